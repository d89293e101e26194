// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process backend (offline mode and tests).
//!
//! Every operation yields once before touching state so that concurrent
//! callers interleave at the same points they would against a real server.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::persist::{MemorySessionStorage, PersistedAuth, SessionStorage};
use super::{Credential, IdentityProvider, RowStore};
use crate::error::{AppError, Result};
use crate::models::{AuthUser, ConsentRecord, NewProfile, Profile, ProfileUpdate, Session};

const SESSION_TTL_SECS: i64 = 3600;

/// Identity provider that issues sessions for pre-registered credentials.
pub struct InMemoryIdentityProvider {
    storage: MemorySessionStorage,
    /// One-time exchange codes
    codes: DashMap<String, AuthUser>,
    access_tokens: DashMap<String, AuthUser>,
    refresh_tokens: DashMap<String, AuthUser>,
    token_seq: AtomicU64,
    offline: AtomicBool,
    sign_out_calls: AtomicUsize,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::with_storage(MemorySessionStorage::new())
    }

    /// Provider backed by an existing storage slot (simulates a relaunch).
    pub fn with_storage(storage: MemorySessionStorage) -> Self {
        Self {
            storage,
            codes: DashMap::new(),
            access_tokens: DashMap::new(),
            refresh_tokens: DashMap::new(),
            token_seq: AtomicU64::new(0),
            offline: AtomicBool::new(false),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    pub fn storage(&self) -> &MemorySessionStorage {
        &self.storage
    }

    /// Register a one-time exchange code for `user`.
    pub fn issue_code(&self, code: impl Into<String>, user: AuthUser) {
        self.codes.insert(code.into(), user);
    }

    /// Mint a token pair for `user` without persisting a session.
    pub fn issue_tokens(&self, user: AuthUser) -> (String, String) {
        let n = self.token_seq.fetch_add(1, Ordering::SeqCst);
        let access = format!("access-{}-{}", user.id, n);
        let refresh = format!("refresh-{}-{}", user.id, n);
        self.access_tokens.insert(access.clone(), user.clone());
        self.refresh_tokens.insert(refresh.clone(), user);
        (access, refresh)
    }

    /// Make every call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Provider("network unreachable".to_string()));
        }
        Ok(())
    }

    fn mint_session(&self, user: AuthUser) -> Session {
        let (access_token, refresh_token) = self.issue_tokens(user.clone());
        Session {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(SESSION_TTL_SECS),
            user,
        }
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>> {
        tokio::task::yield_now().await;
        self.check_online()?;
        Ok(self.storage.load().await?.session)
    }

    async fn resolve_session(&self, credential: Credential) -> Result<Session> {
        tokio::task::yield_now().await;
        self.check_online()?;

        let user = match &credential {
            Credential::Code(code) => self.codes.remove(code).map(|(_, user)| user),
            Credential::Tokens { access_token, .. } => {
                self.access_tokens.get(access_token).map(|u| u.value().clone())
            }
            Credential::RefreshToken(token) => {
                self.refresh_tokens.remove(token).map(|(_, user)| user)
            }
        }
        .ok_or_else(|| {
            AppError::Provider(format!("invalid_grant: unknown {}", credential.kind()))
        })?;

        let session = match credential {
            Credential::Tokens {
                access_token,
                refresh_token,
            } => Session {
                access_token,
                refresh_token,
                expires_at: Utc::now() + Duration::seconds(SESSION_TTL_SECS),
                user,
            },
            _ => self.mint_session(user),
        };

        self.storage
            .save(&PersistedAuth {
                session: Some(session.clone()),
                code_verifier: None,
            })
            .await?;

        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        tokio::task::yield_now().await;
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);

        let persisted = self.storage.load().await?;
        self.storage.clear().await?;

        self.check_online()?;
        if let Some(session) = persisted.session {
            self.access_tokens.remove(&session.access_token);
            self.refresh_tokens.remove(&session.refresh_token);
        }
        Ok(())
    }
}

/// Row store with the same uniqueness rules as the real tables:
/// `profiles.id` and `profiles.username` are unique, `user_consent` is keyed
/// by `user_id`.
#[derive(Default)]
pub struct InMemoryRowStore {
    profiles: DashMap<String, Profile>,
    /// username -> profile id
    usernames: DashMap<String, String>,
    consent: DashMap<String, ConsentRecord>,
    profile_inserts: AtomicUsize,
    consent_upserts: AtomicUsize,
    offline: AtomicBool,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful profile inserts.
    pub fn profile_inserts(&self) -> usize {
        self.profile_inserts.load(Ordering::SeqCst)
    }

    pub fn consent_upserts(&self) -> usize {
        self.consent_upserts.load(Ordering::SeqCst)
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Seed a consent record directly.
    pub fn put_consent(&self, record: ConsentRecord) {
        self.consent.insert(record.user_id.clone(), record);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Database("network unreachable".to_string()));
        }
        Ok(())
    }

    fn claim_username(&self, username: &str, id: &str) -> Result<()> {
        match self.usernames.entry(username.to_string()) {
            Entry::Occupied(owner) if owner.get() != id => Err(AppError::UniqueViolation(
                "profiles_username_key".to_string(),
            )),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id.to_string());
                Ok(())
            }
        }
    }
}

impl RowStore for InMemoryRowStore {
    async fn find_profile(&self, id: &str) -> Result<Option<Profile>> {
        tokio::task::yield_now().await;
        self.check_online()?;
        Ok(self.profiles.get(id).map(|p| p.value().clone()))
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<Profile> {
        tokio::task::yield_now().await;
        self.check_online()?;

        match self.profiles.entry(profile.id.clone()) {
            Entry::Occupied(_) => Err(AppError::UniqueViolation("profiles_pkey".to_string())),
            Entry::Vacant(slot) => {
                self.claim_username(&profile.username, &profile.id)?;
                let row = Profile::from(profile.clone());
                slot.insert(row.clone());
                self.profile_inserts.fetch_add(1, Ordering::SeqCst);
                Ok(row)
            }
        }
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<Profile> {
        tokio::task::yield_now().await;
        self.check_online()?;

        let mut row = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| AppError::Database(format!("No profile row for {}", id)))?;

        if let Some(username) = &update.username {
            if *username != row.username {
                self.claim_username(username, id)?;
                self.usernames.remove(&row.username);
                row.username = username.clone();
            }
        }
        if let Some(emoji) = &update.preferred_emoji {
            row.preferred_emoji = Some(emoji.clone());
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn find_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>> {
        tokio::task::yield_now().await;
        self.check_online()?;
        Ok(self.consent.get(user_id).map(|c| c.value().clone()))
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> Result<()> {
        tokio::task::yield_now().await;
        self.check_online()?;
        self.consent.insert(record.user_id.clone(), record.clone());
        self.consent_upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
