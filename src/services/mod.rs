// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - auth orchestration layer.

pub mod callback;
pub mod consent;
pub mod provisioner;
pub mod session;

pub use callback::{CallbackHandler, CallbackOutcome, CallbackState, Route};
pub use consent::{BlockReason, ConsentChoice, ConsentGate, GateSnapshot, GateState};
pub use provisioner::{derive_username, ProfileProvisioner};
pub use session::{AuthSnapshot, SessionStore};
