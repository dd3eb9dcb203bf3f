use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attributes::OrgAttributes;
use crate::types::{OrgKind, OrgState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    /// Identity provider ID; set once when the record is first synced
    pub remote_id: Option<String>,
    pub name: String,
    pub description: String,
    #[serde(rename = "custom_data")]
    pub attributes: OrgAttributes,
    pub active: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    /// Ancestor whose cascade suspended this org; none for an independent suspension
    pub suspended_by_org_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Organization {
    /// New, not yet persisted organization
    pub fn draft(name: &str, description: &str, attributes: OrgAttributes, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_id: None,
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            attributes,
            active: true,
            suspended_at: None,
            suspended_by_org_id: None,
            synced_at: None,
            sync_error: None,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        }
    }

    pub fn kind(&self) -> OrgKind {
        self.attributes.kind()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.attributes.parent_id()
    }

    pub fn state(&self) -> OrgState {
        if self.deleted_at.is_some() {
            OrgState::Deleted
        } else if self.active {
            OrgState::Active
        } else {
            OrgState::Suspended
        }
    }

    /// Tree node for this organization, if it has been synced
    pub fn node(&self) -> Option<OrgNode> {
        let remote_id = self.remote_id.clone()?;
        Some(OrgNode {
            id: self.id,
            remote_id,
            kind: self.kind(),
            parent_id: self.parent_id().map(str::to_string),
            active: self.active,
            suspended_by_org_id: self.suspended_by_org_id.clone(),
        })
    }
}

/// Minimal projection of an organization used for hierarchy traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgNode {
    pub id: Uuid,
    pub remote_id: String,
    pub kind: OrgKind,
    pub parent_id: Option<String>,
    pub active: bool,
    pub suspended_by_org_id: Option<String>,
}
