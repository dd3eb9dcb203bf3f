use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A provisioned system, owned by the organization that created it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct System {
    pub id: Uuid,
    pub name: String,
    pub system_type: String,
    /// Remote ID of the creating organization; never changes
    pub creator_org_id: String,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspended_by_org_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl System {
    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }
}
