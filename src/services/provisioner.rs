// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile provisioning and edits.

use std::sync::Arc;

use validator::Validate;

use crate::backend::{IdentityProvider, RowStore};
use crate::error::{AppError, Result};
use crate::models::{AuthUser, Identity, NewProfile, Profile, ProfileUpdate, DEFAULT_USERNAME};
use crate::services::session::SessionStore;

/// Username for a first-time profile.
pub fn derive_username(user: &AuthUser) -> String {
    user.preferred_username()
}

/// Makes sure every signed-in identity has exactly one profile row.
pub struct ProfileProvisioner<R, P> {
    store: Arc<R>,
    sessions: Arc<SessionStore<P>>,
}

impl<R: RowStore, P: IdentityProvider> ProfileProvisioner<R, P> {
    pub fn new(store: Arc<R>, sessions: Arc<SessionStore<P>>) -> Self {
        Self { store, sessions }
    }

    /// Return the profile for `identity_id`, creating it if absent.
    ///
    /// An existing row is returned untouched. When a concurrent attempt wins
    /// the insert, its row is returned instead, even if it carries a
    /// different username.
    pub async fn ensure(&self, identity_id: &str, fallback_username: &str) -> Result<Profile> {
        if let Some(existing) = self.store.find_profile(identity_id).await? {
            tracing::debug!(user_id = %identity_id, "Profile already exists");
            return Ok(existing);
        }

        let username = match fallback_username.trim() {
            "" => DEFAULT_USERNAME,
            name => name,
        };
        let new_profile = NewProfile::new(identity_id, username);

        match self.store.insert_profile(&new_profile).await {
            Ok(profile) => {
                tracing::info!(user_id = %identity_id, username = %profile.username, "Created profile");
                Ok(profile)
            }
            Err(e) if e.is_unique_violation() => {
                match self.store.find_profile(identity_id).await? {
                    Some(existing) => {
                        tracing::info!(
                            user_id = %identity_id,
                            username = %existing.username,
                            "Profile created concurrently, using existing row"
                        );
                        Ok(existing)
                    }
                    None => {
                        tracing::warn!(
                            user_id = %identity_id,
                            username = %username,
                            error = %e,
                            "Profile insert conflicted but no row exists"
                        );
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn ensure_for(&self, identity: &Identity) -> Result<Profile> {
        self.ensure(&identity.id, &identity.username).await
    }

    pub async fn load(&self, identity_id: &str) -> Result<Option<Profile>> {
        self.store.find_profile(identity_id).await
    }

    /// Apply a user-initiated edit.
    ///
    /// A changed username is pushed into the session store so the rest of the
    /// app sees it without a reload.
    pub async fn update(&self, identity: &Identity, mut update: ProfileUpdate) -> Result<Profile> {
        update.username = update.username.map(|u| u.trim().to_string());
        update
            .validate()
            .map_err(|e| AppError::BadRequest(format!("Invalid profile update: {}", e)))?;
        if update.is_empty() {
            return Err(AppError::BadRequest("Nothing to update".to_string()));
        }

        let profile = self.store.update_profile(&identity.id, &update).await?;
        if update.username.is_some() {
            self.sessions.set_username(&identity.id, &profile.username);
        }

        tracing::info!(user_id = %identity.id, "Profile updated");
        Ok(profile)
    }
}
