//! Profile model stored in the `profiles` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Application-level user record, keyed 1:1 to an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Same as the identity id
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub preferred_emoji: Option<String>,
}

/// Row inserted on first login.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewProfile {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            username: username.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<NewProfile> for Profile {
    fn from(p: NewProfile) -> Self {
        Self {
            id: p.id,
            username: p.username,
            created_at: p.created_at,
            updated_at: p.updated_at,
            preferred_emoji: None,
        }
    }
}

/// User-initiated profile edit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 3, max = 30))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[validate(length(min = 1, max = 16))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_emoji: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.preferred_emoji.is_none()
    }
}
