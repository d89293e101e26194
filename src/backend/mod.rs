//! Backend collaborators: identity provider and row store.
//!
//! The orchestration services only talk to the backend through the two
//! traits below. [`rest`] implements them over HTTP, [`memory`] in process
//! (offline mode and tests).

pub mod memory;
pub mod persist;
pub mod pkce;
pub mod rest;

use std::future::Future;

use crate::error::Result;
use crate::models::{ConsentRecord, NewProfile, Profile, ProfileUpdate, Session};

pub use memory::{InMemoryIdentityProvider, InMemoryRowStore};
pub use persist::{FileSessionStorage, MemorySessionStorage, PersistedAuth, SessionStorage};
pub use rest::{RestClient, RestIdentityProvider, RestRowStore};

/// Table names as constants.
pub mod tables {
    pub const PROFILES: &str = "profiles";
    /// Consent records (keyed by user_id)
    pub const USER_CONSENT: &str = "user_consent";
}

/// A credential delivered by an authentication callback.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// One-time exchange code (PKCE flow)
    Code(String),
    /// Tokens handed over directly (implicit flow)
    Tokens {
        access_token: String,
        refresh_token: String,
    },
    RefreshToken(String),
}

impl Credential {
    /// Name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Code(_) => "code",
            Credential::Tokens { .. } => "tokens",
            Credential::RefreshToken(_) => "refresh_token",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential::{}(<redacted>)", self.kind())
    }
}

/// Identity provider client.
///
/// Session persistence and transparent refresh are the implementation's
/// concern; callers never touch persisted storage directly.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Current valid session, if any.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>>> + Send;

    /// Turn a callback credential into a session (and persist it).
    fn resolve_session(&self, credential: Credential)
        -> impl Future<Output = Result<Session>> + Send;

    /// Invalidate the current session remotely and drop it locally.
    fn sign_out(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Row store client for the `profiles` and `user_consent` tables.
pub trait RowStore: Send + Sync + 'static {
    fn find_profile(&self, id: &str) -> impl Future<Output = Result<Option<Profile>>> + Send;

    /// Insert a new profile.
    ///
    /// Fails with [`AppError::UniqueViolation`](crate::error::AppError::UniqueViolation)
    /// if the id or username already exists.
    fn insert_profile(&self, profile: &NewProfile) -> impl Future<Output = Result<Profile>> + Send;

    fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> impl Future<Output = Result<Profile>> + Send;

    fn find_consent(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<ConsentRecord>>> + Send;

    /// Insert or replace the record keyed by `user_id`.
    fn upsert_consent(&self, record: &ConsentRecord) -> impl Future<Output = Result<()>> + Send;
}
