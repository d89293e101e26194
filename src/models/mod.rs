// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod consent;
pub mod profile;
pub mod user;

pub use consent::ConsentRecord;
pub use profile::{NewProfile, Profile, ProfileUpdate};
pub use user::{AuthUser, Identity, Session, DEFAULT_USERNAME};
