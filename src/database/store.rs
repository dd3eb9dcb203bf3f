use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StoreError;
use super::models::{OrgNode, Organization, System, User};

/// Read side of the local store, plus transaction entry.
///
/// Reads never take part in a transaction: hierarchy lookups may observe
/// data committed concurrently by writers.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Open a transaction. Dropping the returned handle without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Fetch an organization by local ID, including soft-deleted rows
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, StoreError>;

    async fn find_organization_by_remote_id(&self, remote_id: &str) -> Result<Option<Organization>, StoreError>;

    /// Parent-pointer lookup for a single live organization
    async fn find_organization_node(&self, remote_id: &str) -> Result<Option<OrgNode>, StoreError>;

    /// Every live, synced organization as a tree node
    async fn list_organization_nodes(&self) -> Result<Vec<OrgNode>, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Live users belonging to any of the given organizations
    async fn list_users_by_organizations(&self, org_ids: &[String]) -> Result<Vec<User>, StoreError>;

    async fn get_system(&self, id: Uuid) -> Result<Option<System>, StoreError>;

    /// IDs of live systems created by any of the given organizations
    async fn list_system_ids_by_creators(&self, org_ids: &[String]) -> Result<Vec<Uuid>, StoreError>;
}

/// Write side of the local store. All writes happen inside one of these.
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_organization(&mut self, org: &Organization) -> Result<(), StoreError>;

    /// Persist name, description and attributes
    async fn update_organization(&mut self, org: &Organization) -> Result<(), StoreError>;

    /// Store the remote ID and mark synced. Fails if a different remote ID is already set.
    async fn mark_organization_synced(&mut self, id: Uuid, remote_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn record_organization_sync_error(&mut self, id: Uuid, message: &str) -> Result<(), StoreError>;

    async fn soft_delete_organization(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Independent suspension of a single active organization
    async fn suspend_organization(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Clear a suspension on a single organization
    async fn reactivate_organization(&mut self, id: Uuid) -> Result<bool, StoreError>;

    /// Suspend the active organizations among `remote_ids`, marking them with `by`
    async fn suspend_organizations(&mut self, remote_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn reactivate_organizations_suspended_by(&mut self, by: &str) -> Result<u64, StoreError>;

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError>;

    /// Persist profile fields (name, email, phone, custom data)
    async fn update_user(&mut self, user: &User) -> Result<(), StoreError>;

    async fn mark_user_synced(&mut self, id: Uuid, remote_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn record_user_sync_error(&mut self, id: Uuid, message: &str) -> Result<(), StoreError>;

    async fn soft_delete_user(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Independent suspension (`Some`) or reactivation (`None`) of one user
    async fn set_user_suspended(&mut self, id: Uuid, at: Option<DateTime<Utc>>) -> Result<bool, StoreError>;

    /// Suspend the active users of the given organizations; returns the affected users
    async fn suspend_users(&mut self, org_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<Vec<User>, StoreError>;

    async fn reactivate_users_suspended_by(&mut self, by: &str) -> Result<Vec<User>, StoreError>;

    async fn insert_system(&mut self, system: &System) -> Result<(), StoreError>;

    async fn soft_delete_system(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn soft_delete_systems_by_creators(&mut self, org_ids: &[String], at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn suspend_systems(&mut self, org_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn reactivate_systems_suspended_by(&mut self, by: &str) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
