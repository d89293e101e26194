// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Terms-of-service gate.
//!
//! Nothing behind the gate is reachable until the signed-in identity has a
//! consent record with both flags set for the required terms version. A
//! failed lookup blocks; it never lets the user through.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::backend::{IdentityProvider, RowStore};
use crate::error::{AppError, Result};
use crate::models::ConsentRecord;
use crate::services::session::SessionStore;
use crate::shutdown::ExitSignal;

/// Why the gate is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    NoRecord,
    /// A record exists but one of the toggles is off
    NotAccepted,
    VersionMismatch {
        accepted: String,
        required: String,
    },
    /// The lookup itself failed
    CheckFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    /// Nobody is signed in; the gate does not apply.
    Unauthenticated,
    Checking,
    Blocked {
        reason: BlockReason,
    },
    Clear,
    /// The user declined. Terminal for this process.
    Exited,
}

impl GateState {
    pub fn allows_access(&self) -> bool {
        matches!(self, GateState::Clear)
    }

    /// True while the consent prompt must swallow every other interaction,
    /// back navigation included.
    pub fn intercepts_input(&self) -> bool {
        matches!(self, GateState::Blocked { .. })
    }
}

/// The two toggles on the consent screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentChoice {
    #[serde(default)]
    pub terms_accepted: bool,
    #[serde(default)]
    pub privacy_accepted: bool,
}

impl ConsentChoice {
    pub fn both() -> Self {
        Self {
            terms_accepted: true,
            privacy_accepted: true,
        }
    }
}

/// Gate state together with the session epoch it was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct GateSnapshot {
    pub state: GateState,
    pub epoch: u64,
}

pub struct ConsentGate<R, P> {
    store: Arc<R>,
    sessions: Arc<SessionStore<P>>,
    required_version: String,
    exit: ExitSignal,
    state: watch::Sender<GateSnapshot>,
}

impl<R: RowStore, P: IdentityProvider> ConsentGate<R, P> {
    pub fn new(
        store: Arc<R>,
        sessions: Arc<SessionStore<P>>,
        required_version: impl Into<String>,
        exit: ExitSignal,
    ) -> Self {
        let (state, _) = watch::channel(GateSnapshot {
            state: GateState::Unauthenticated,
            epoch: sessions.epoch(),
        });
        Self {
            store,
            sessions,
            required_version: required_version.into(),
            exit,
            state,
        }
    }

    pub fn required_version(&self) -> &str {
        &self.required_version
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateSnapshot> {
        self.state.subscribe()
    }

    /// Decide whether the signed-in identity may enter the app.
    ///
    /// Once clear, the gate stays clear without another lookup until the
    /// signed-in user changes. A lookup that finishes after the user changed
    /// is discarded.
    pub async fn check(&self) -> GateState {
        if self.exit.is_triggered() {
            return GateState::Exited;
        }

        let epoch = self.sessions.epoch();
        let Some(identity) = self.sessions.current_identity() else {
            self.transition(epoch, GateState::Unauthenticated);
            return self.state();
        };

        {
            let snap = self.state.borrow();
            if snap.state == GateState::Clear && snap.epoch == epoch {
                return GateState::Clear;
            }
        }

        self.settle(epoch, GateState::Checking);
        let result = self.store.find_consent(&identity.id).await;

        let next = match result {
            Ok(None) => GateState::Blocked {
                reason: BlockReason::NoRecord,
            },
            Ok(Some(record)) => self.evaluate(&record),
            Err(e) => {
                tracing::warn!(user_id = %identity.id, error = %e, "Consent lookup failed, blocking");
                GateState::Blocked {
                    reason: BlockReason::CheckFailed,
                }
            }
        };

        if self.settle(epoch, next.clone()) {
            tracing::info!(user_id = %identity.id, state = ?next, "Consent checked");
        } else {
            tracing::debug!(user_id = %identity.id, "Discarding stale consent result");
        }
        self.state()
    }

    /// Record acceptance of the current terms and open the gate.
    ///
    /// Only valid while blocked (or while a check is still deciding), and only
    /// with both toggles on. If the write
    /// fails the gate stays blocked and the error is returned for a manual
    /// retry.
    pub async fn accept(&self, choice: ConsentChoice) -> Result<GateState> {
        let identity = self
            .sessions
            .current_identity()
            .ok_or(AppError::Unauthorized)?;
        let epoch = self.sessions.epoch();

        {
            let snap = self.state.borrow();
            let pending = snap.state.intercepts_input() || snap.state == GateState::Checking;
            if !pending || snap.epoch != epoch {
                return Err(AppError::BadRequest(
                    "No consent decision is pending".to_string(),
                ));
            }
        }

        if !(choice.terms_accepted && choice.privacy_accepted) {
            return Err(AppError::BadRequest(
                "Both the terms of service and the privacy policy must be accepted".to_string(),
            ));
        }

        let record = ConsentRecord::accepted(&identity.id, &self.required_version);
        if let Err(e) = self.store.upsert_consent(&record).await {
            tracing::warn!(user_id = %identity.id, error = %e, "Failed to record consent");
            return Err(e);
        }

        if self.transition(epoch, GateState::Clear) {
            tracing::info!(
                user_id = %identity.id,
                terms_version = %self.required_version,
                "Consent accepted"
            );
        }
        Ok(self.state())
    }

    /// Sign out and exit. Irreversible for the life of the process.
    pub async fn decline(&self) -> GateState {
        let user_id = self.sessions.current_identity().map(|i| i.id);
        self.sessions.clear_session().await;

        self.state.send_replace(GateSnapshot {
            state: GateState::Exited,
            epoch: self.sessions.epoch(),
        });
        tracing::info!(user_id = ?user_id, "Consent declined, exiting");
        self.exit.trigger();
        GateState::Exited
    }

    /// Forget any decision (after logout). No effect once exited.
    pub fn reset(&self) {
        self.transition(self.sessions.epoch(), GateState::Unauthenticated);
    }

    fn evaluate(&self, record: &ConsentRecord) -> GateState {
        if record.satisfies(&self.required_version) {
            return GateState::Clear;
        }
        let reason = if !(record.terms_accepted && record.privacy_accepted) {
            BlockReason::NotAccepted
        } else {
            BlockReason::VersionMismatch {
                accepted: record.terms_version.clone(),
                required: self.required_version.clone(),
            }
        };
        GateState::Blocked { reason }
    }

    /// Move to `state` if the session is still at `epoch` and the gate has
    /// not exited. Returns whether the state was applied.
    fn transition(&self, epoch: u64, state: GateState) -> bool {
        self.apply(epoch, state, false)
    }

    /// Like [`Self::transition`], but keeps a `Clear` already reached at
    /// `epoch` (an acceptance that landed mid-lookup).
    fn settle(&self, epoch: u64, state: GateState) -> bool {
        self.apply(epoch, state, true)
    }

    fn apply(&self, epoch: u64, state: GateState, keep_clear: bool) -> bool {
        if self.sessions.epoch() != epoch {
            return false;
        }
        let mut applied = false;
        self.state.send_if_modified(|snap| {
            if snap.state == GateState::Exited {
                return false;
            }
            if keep_clear
                && snap.state == GateState::Clear
                && snap.epoch == epoch
                && state != GateState::Clear
            {
                return false;
            }
            applied = true;
            let changed = snap.state != state || snap.epoch != epoch;
            snap.state = state;
            snap.epoch = epoch;
            changed
        });
        applied
    }
}
