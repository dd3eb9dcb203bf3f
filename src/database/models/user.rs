use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub remote_id: Option<String>,
    pub username: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    /// Remote ID of the owning organization
    pub organization_id: String,
    pub role_ids: Vec<String>,
    pub custom_data: Map<String, Value>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspended_by_org_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Derive an identity-provider-safe username from an email address
pub fn username_from_email(email: &str) -> String {
    let local_part = email.split('@').next().unwrap_or_default();
    let mut username = sanitize(local_part);

    if let Some(first) = username.chars().next() {
        if !(first.is_ascii_alphabetic() || first == '_') {
            username.insert(0, '_');
        }
    }

    if username.is_empty() {
        username = sanitize(&format!("user_{}", email.replace('@', "_at_")));
    }

    username
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
