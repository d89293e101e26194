// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication callback handling.
//!
//! Flow: normalize credentials → resolve a session → establish it →
//! provision the profile → navigate to the landing screen.
//!
//! Each call to [`CallbackHandler::handle`] is one attempt. Starting a new
//! attempt or calling [`CallbackHandler::abandon`] makes the previous one
//! stale; a stale attempt stops applying its results at its next await point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::backend::{IdentityProvider, RowStore};
use crate::credentials::{normalize, CallbackInput};
use crate::error::{AppError, Result};
use crate::models::Identity;
use crate::services::provisioner::ProfileProvisioner;
use crate::services::session::SessionStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallbackState {
    Idle,
    Processing,
    Succeeded { identity: Identity },
    Failed { message: String },
    Abandoned,
}

/// Where the app navigates once the callback is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Landing,
    Login,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Landing => "/",
            Route::Login => "/login",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackOutcome {
    #[serde(flatten)]
    pub state: CallbackState,
    /// `None` when the attempt was abandoned
    pub redirect: Option<Route>,
}

impl CallbackOutcome {
    fn abandoned() -> Self {
        Self {
            state: CallbackState::Abandoned,
            redirect: None,
        }
    }
}

pub struct CallbackHandler<P, R> {
    sessions: Arc<SessionStore<P>>,
    provisioner: Arc<ProfileProvisioner<R, P>>,
    settle_delay: Duration,
    error_delay: Duration,
    generation: AtomicU64,
    state: watch::Sender<CallbackState>,
}

impl<P: IdentityProvider, R: RowStore> CallbackHandler<P, R> {
    pub fn new(
        sessions: Arc<SessionStore<P>>,
        provisioner: Arc<ProfileProvisioner<R, P>>,
        settle_delay: Duration,
        error_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(CallbackState::Idle);
        Self {
            sessions,
            provisioner,
            settle_delay,
            error_delay,
            generation: AtomicU64::new(0),
            state,
        }
    }

    pub fn state(&self) -> CallbackState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallbackState> {
        self.state.subscribe()
    }

    /// Run one callback attempt to completion, including the delay before
    /// navigation. Never retries.
    pub async fn handle(&self, input: CallbackInput) -> CallbackOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(generation, CallbackState::Processing);

        match self.complete(generation, &input).await {
            Ok(Some(identity)) => {
                let state = CallbackState::Succeeded { identity };
                self.publish(generation, state.clone());
                tokio::time::sleep(self.settle_delay).await;
                if self.is_stale(generation) {
                    return CallbackOutcome::abandoned();
                }
                CallbackOutcome {
                    state,
                    redirect: Some(Route::Landing),
                }
            }
            Ok(None) => {
                tracing::debug!(generation, "Callback attempt abandoned");
                CallbackOutcome::abandoned()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Authentication callback failed");
                let state = CallbackState::Failed {
                    message: e.user_message(),
                };
                if !self.publish(generation, state.clone()) {
                    return CallbackOutcome::abandoned();
                }
                tokio::time::sleep(self.error_delay).await;
                if self.is_stale(generation) {
                    return CallbackOutcome::abandoned();
                }
                CallbackOutcome {
                    state,
                    redirect: Some(Route::Login),
                }
            }
        }
    }

    /// Mark the in-flight attempt stale (the screen went away).
    pub fn abandon(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(CallbackState::Abandoned);
    }

    /// Returns the signed-in identity, or `None` if the attempt went stale.
    async fn complete(&self, generation: u64, input: &CallbackInput) -> Result<Option<Identity>> {
        let credentials = normalize(input)?;
        let credential = credentials.credential().ok_or(AppError::MissingSession)?;
        tracing::debug!(kind = credential.kind(), "Resolving session from callback");

        let session = self
            .sessions
            .provider()
            .resolve_session(credential)
            .await?;
        if self.is_stale(generation) {
            return Ok(None);
        }

        let identity = self.sessions.establish_session(session);

        // Provisioning runs again on next launch, so a failure here is not fatal
        if let Err(e) = self.provisioner.ensure_for(&identity).await {
            tracing::warn!(
                user_id = %identity.id,
                error = %e,
                "Failed to provision profile, continuing anyway"
            );
        }
        if self.is_stale(generation) {
            return Ok(None);
        }

        tracing::info!(user_id = %identity.id, "Callback completed");
        Ok(Some(identity))
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn publish(&self, generation: u64, state: CallbackState) -> bool {
        if self.is_stale(generation) {
            return false;
        }
        self.state.send_replace(state);
        true
    }
}
