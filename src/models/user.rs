//! Identity and session models as delivered by the identity provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Username used when neither metadata nor e-mail yields one.
pub const DEFAULT_USERNAME: &str = "user";

/// User record attached to a session by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Provider-assigned identifier (opaque)
    pub id: String,
    /// E-mail address, if the account has one
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form account metadata supplied at sign-up
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            user_metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.user_metadata.insert(key.to_string(), value.into());
        self
    }

    /// Username derived from account data.
    ///
    /// Preference order: `user_metadata.username`, the local part of the
    /// e-mail address, then [`DEFAULT_USERNAME`].
    pub fn preferred_username(&self) -> String {
        let from_metadata = self
            .user_metadata
            .get("username")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(name) = from_metadata {
            return name.to_string();
        }

        let from_email = self
            .email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        from_email.unwrap_or(DEFAULT_USERNAME).to_string()
    }
}

/// An authenticated end user as seen by the rest of the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub username: String,
}

impl From<&AuthUser> for Identity {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            username: user.preferred_username(),
        }
    }
}

/// A live authentication grant.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl Session {
    /// True if the access token expires within `margin_secs`.
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(margin_secs) >= self.expires_at
    }

    pub fn identity(&self) -> Identity {
        Identity::from(&self.user)
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}
