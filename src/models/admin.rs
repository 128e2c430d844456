//! Admin registry record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence of this document (keyed by lower-cased email) grants admin rights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRecord {
    #[serde(default)]
    pub id: String,
    pub email: String,
    #[serde(default, rename = "addedAt", skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "addedBy", skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

impl AdminRecord {
    pub fn new(email: &str, added_by: Option<&str>) -> Self {
        let email = Self::normalize(email);
        Self {
            id: email.clone(),
            email,
            added_at: Some(Utc::now()),
            added_by: added_by.map(|s| s.to_string()),
        }
    }

    /// Registry key for an email address.
    pub fn normalize(email: &str) -> String {
        email.trim().to_lowercase()
    }
}
