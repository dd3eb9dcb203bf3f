//! Identity provider collaborator: remote CRUD for organizations and users,
//! membership, and role assignment.

pub mod error;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use error::RemoteError;
pub use http::HttpIdentityProvider;
pub use memory::{IdpCall, MemoryIdentityProvider};

/// Organization fields sent to the identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationPayload {
    pub name: String,
    pub description: String,
    pub custom_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrganization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub custom_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRemoteUser {
    pub username: String,
    pub primary_email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub custom_data: Map<String, Value>,
}

/// Partial user update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfilePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub primary_email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_suspended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Remote operations the sync core depends on
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_organization(&self, payload: &OrganizationPayload) -> Result<RemoteOrganization, RemoteError>;

    async fn update_organization(&self, id: &str, payload: &OrganizationPayload) -> Result<RemoteOrganization, RemoteError>;

    async fn delete_organization(&self, id: &str) -> Result<(), RemoteError>;

    async fn create_user(&self, user: &NewRemoteUser) -> Result<RemoteUser, RemoteError>;

    async fn update_user(&self, id: &str, profile: &UserProfilePayload) -> Result<RemoteUser, RemoteError>;

    async fn delete_user(&self, id: &str) -> Result<(), RemoteError>;

    async fn set_user_suspended(&self, id: &str, suspended: bool) -> Result<(), RemoteError>;

    async fn suspend_user(&self, id: &str) -> Result<(), RemoteError> {
        self.set_user_suspended(id, true).await
    }

    async fn reactivate_user(&self, id: &str) -> Result<(), RemoteError> {
        self.set_user_suspended(id, false).await
    }

    async fn assign_user_to_organization(&self, org_id: &str, user_id: &str) -> Result<(), RemoteError>;

    /// Tenant-wide roles
    async fn assign_user_roles(&self, user_id: &str, role_ids: &[String]) -> Result<(), RemoteError>;

    /// Roles scoped to one organization membership
    async fn assign_organization_roles(&self, org_id: &str, user_id: &str, role_ids: &[String]) -> Result<(), RemoteError>;

    async fn find_organization_role(&self, name: &str) -> Result<RoleDefinition, RemoteError>;

    /// Roles granted automatically to users joining the organization just in time
    async fn set_jit_roles(&self, org_id: &str, role_ids: &[String]) -> Result<(), RemoteError>;
}
