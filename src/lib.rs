// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! chat-auth: authentication, session and consent orchestration for a chat
//! client.
//!
//! This crate holds the client-side auth core: completing login callbacks,
//! persisting and restoring the session, provisioning the user's profile on
//! first login, and gating the app behind terms-of-service consent. The
//! backend is reached through the [`backend::IdentityProvider`] and
//! [`backend::RowStore`] traits.

pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;

use std::sync::Arc;

use backend::{IdentityProvider, RowStore};
use config::Config;
use services::{CallbackHandler, ConsentGate, GateState, ProfileProvisioner, SessionStore};
use shutdown::ExitSignal;

/// Shared application state.
pub struct AppState<P, R> {
    pub config: Config,
    pub sessions: Arc<SessionStore<P>>,
    pub provisioner: Arc<ProfileProvisioner<R, P>>,
    pub consent: Arc<ConsentGate<R, P>>,
    pub callback: Arc<CallbackHandler<P, R>>,
    pub exit: ExitSignal,
}

impl<P: IdentityProvider, R: RowStore> AppState<P, R> {
    pub fn new(config: Config, provider: Arc<P>, store: Arc<R>) -> Self {
        let exit = ExitSignal::new();
        let sessions = Arc::new(SessionStore::new(provider));
        let provisioner = Arc::new(ProfileProvisioner::new(store.clone(), sessions.clone()));
        let consent = Arc::new(ConsentGate::new(
            store,
            sessions.clone(),
            config.terms_version.clone(),
            exit.clone(),
        ));
        let callback = Arc::new(CallbackHandler::new(
            sessions.clone(),
            provisioner.clone(),
            config.callback_settle_delay,
            config.callback_error_delay,
        ));

        Self {
            config,
            sessions,
            provisioner,
            consent,
            callback,
            exit,
        }
    }

    /// App launch: restore → provision → consent check.
    pub async fn start(&self) -> GateState {
        if let Some(identity) = self.sessions.restore_session().await {
            if let Err(e) = self.provisioner.ensure_for(&identity).await {
                tracing::warn!(user_id = %identity.id, error = %e, "Failed to provision profile on launch");
            }
        }
        self.consent.check().await
    }

    /// User-initiated logout. Resets the consent gate for the next login.
    pub async fn sign_out(&self) {
        self.sessions.clear_session().await;
        self.consent.reset();
    }
}
