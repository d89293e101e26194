// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session store: the single source of truth for who is signed in.
//!
//! State lives in a `watch` channel so views can re-render on change and
//! async work can compare the auth epoch before applying stale results.

use std::sync::Arc;

use tokio::sync::watch;

use crate::backend::IdentityProvider;
use crate::models::{Identity, Session};

/// Point-in-time view of the authentication state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub identity: Option<Identity>,
    pub session: Option<Session>,
    /// Bumped whenever the signed-in user changes (login, logout, switch).
    pub epoch: u64,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// Holds the live session for one client instance.
pub struct SessionStore<P> {
    provider: Arc<P>,
    state: watch::Sender<AuthSnapshot>,
}

impl<P: IdentityProvider> SessionStore<P> {
    pub fn new(provider: Arc<P>) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Self { provider, state }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Restore a previously persisted session at startup.
    ///
    /// Provider failures are treated as "not signed in" so the app falls
    /// through to the login flow instead of failing to start.
    pub async fn restore_session(&self) -> Option<Identity> {
        match self.provider.get_session().await {
            Ok(Some(session)) => {
                let identity = self.establish_session(session);
                tracing::info!(user_id = %identity.id, "Restored session");
                Some(identity)
            }
            Ok(None) => {
                tracing::debug!("No persisted session");
                self.clear_local();
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session restore failed, continuing signed out");
                self.clear_local();
                None
            }
        }
    }

    /// Adopt a fresh session and return the identity it belongs to.
    ///
    /// Establishing the same session twice leaves the state (and epoch)
    /// unchanged. A locally edited username survives a token refresh for
    /// the same user.
    pub fn establish_session(&self, session: Session) -> Identity {
        let mut identity = session.identity();

        self.state.send_if_modified(|snap| {
            match &snap.identity {
                Some(current) if current.id == identity.id => {
                    identity.username = current.username.clone();
                }
                _ => {
                    snap.epoch += 1;
                    tracing::info!(
                        user_id = %identity.id,
                        epoch = snap.epoch,
                        "Session established"
                    );
                }
            }

            let changed = snap.identity.as_ref() != Some(&identity)
                || snap.session.as_ref() != Some(&session);
            snap.identity = Some(identity.clone());
            snap.session = Some(session);
            changed
        });

        identity
    }

    /// Sign out remotely and drop local state.
    ///
    /// Local state is cleared first and stays cleared whatever the provider
    /// answers.
    pub async fn clear_session(&self) {
        let user_id = self.current_identity().map(|i| i.id);
        self.clear_local();

        if let Err(e) = self.provider.sign_out().await {
            tracing::warn!(error = %e, user_id = ?user_id, "Remote sign-out failed");
        } else {
            tracing::info!(user_id = ?user_id, "Signed out");
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.borrow().epoch
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    /// Apply a username change from a profile edit.
    ///
    /// Ignored if `user_id` is no longer the signed-in user.
    pub fn set_username(&self, user_id: &str, username: &str) {
        self.state.send_if_modified(|snap| match snap.identity.as_mut() {
            Some(identity) if identity.id == user_id && identity.username != username => {
                identity.username = username.to_string();
                true
            }
            _ => false,
        });
    }

    fn clear_local(&self) {
        self.state.send_if_modified(|snap| {
            if snap.identity.is_none() && snap.session.is_none() {
                return false;
            }
            snap.identity = None;
            snap.session = None;
            snap.epoch += 1;
            true
        });
    }
}
