//! Consent record stored in the `user_consent` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An identity's acceptance of the terms and privacy text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Same as the identity id (primary key)
    pub user_id: String,
    pub terms_accepted: bool,
    pub privacy_accepted: bool,
    pub accepted_at: DateTime<Utc>,
    pub terms_version: String,
}

impl ConsentRecord {
    /// Record for a full acceptance of `version`, stamped now.
    pub fn accepted(user_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            terms_accepted: true,
            privacy_accepted: true,
            accepted_at: Utc::now(),
            terms_version: version.into(),
        }
    }

    /// Whether this record grants access under `required_version`.
    pub fn satisfies(&self, required_version: &str) -> bool {
        self.terms_accepted && self.privacy_accepted && self.terms_version == required_version
    }
}
