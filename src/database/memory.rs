//! In-process `LocalStore`.
//!
//! Transactions stage their writes against a private copy of the state and
//! replay them against the live state on commit, so concurrent transactions
//! that touch different rows do not clobber each other. Failure points can be
//! armed to exercise compensation paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use uuid::Uuid;

use super::error::StoreError;
use super::models::{OrgNode, Organization, System, User};
use super::store::{LocalStore, StoreTx};

/// Operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Commit,
    InsertOrganization,
    UpdateOrganization,
    SoftDeleteOrganization,
    InsertUser,
    UpdateUser,
    SoftDeleteUser,
    SetUserSuspended,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    systems: HashMap<Uuid, System>,
}

#[derive(Debug, Clone)]
enum Mutation {
    InsertOrganization(Organization),
    UpdateOrganization(Organization),
    MarkOrganizationSynced { id: Uuid, remote_id: String, at: DateTime<Utc> },
    OrganizationSyncError { id: Uuid, message: String },
    SoftDeleteOrganization { id: Uuid, at: DateTime<Utc> },
    SuspendOrganization { id: Uuid, at: DateTime<Utc> },
    ReactivateOrganization { id: Uuid },
    SuspendOrganizations { remote_ids: Vec<String>, by: String, at: DateTime<Utc> },
    ReactivateOrganizationsBy { by: String },
    InsertUser(User),
    UpdateUser(User),
    MarkUserSynced { id: Uuid, remote_id: String, at: DateTime<Utc> },
    UserSyncError { id: Uuid, message: String },
    SoftDeleteUser { id: Uuid, at: DateTime<Utc> },
    SetUserSuspended { id: Uuid, at: Option<DateTime<Utc>> },
    SuspendUsers { org_ids: Vec<String>, by: String, at: DateTime<Utc> },
    ReactivateUsersBy { by: String },
    InsertSystem(System),
    SoftDeleteSystem { id: Uuid, at: DateTime<Utc> },
    SoftDeleteSystemsByCreators { org_ids: Vec<String>, at: DateTime<Utc> },
    SuspendSystems { org_ids: Vec<String>, by: String, at: DateTime<Utc> },
    ReactivateSystemsBy { by: String },
}

enum Applied {
    Done,
    Flag(bool),
    Count(u64),
    Users(Vec<User>),
}

impl Applied {
    fn flag(self) -> bool {
        matches!(self, Applied::Flag(true))
    }

    fn count(self) -> u64 {
        match self {
            Applied::Count(n) => n,
            _ => 0,
        }
    }

    fn users(self) -> Vec<User> {
        match self {
            Applied::Users(users) => users,
            _ => Vec::new(),
        }
    }
}

impl MemoryState {
    fn check_unique_vat(&self, org: &Organization) -> Result<(), StoreError> {
        let vat = org.attributes.vat().trim();
        let duplicate = self.organizations.values().any(|o| {
            o.id != org.id && o.deleted_at.is_none() && o.kind() == org.kind() && o.attributes.vat().trim() == vat
        });
        if duplicate {
            return Err(StoreError::Conflict("VAT already exists".to_string()));
        }
        Ok(())
    }

    fn check_unique_remote_id(&self, id: Uuid, remote_id: &str) -> Result<(), StoreError> {
        let taken = self
            .organizations
            .values()
            .any(|o| o.id != id && o.remote_id.as_deref() == Some(remote_id));
        if taken {
            return Err(StoreError::Conflict(format!("remote_id {} already exists", remote_id)));
        }
        Ok(())
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<Applied, StoreError> {
        match mutation {
            Mutation::InsertOrganization(org) => {
                if self.organizations.contains_key(&org.id) {
                    return Err(StoreError::Conflict(format!("organization {} already exists", org.id)));
                }
                self.check_unique_vat(org)?;
                self.organizations.insert(org.id, org.clone());
                Ok(Applied::Done)
            }
            Mutation::UpdateOrganization(org) => {
                self.check_unique_vat(org)?;
                let existing = self
                    .organizations
                    .get_mut(&org.id)
                    .filter(|o| o.deleted_at.is_none())
                    .ok_or_else(|| StoreError::NotFound(format!("organization {}", org.id)))?;
                existing.name = org.name.clone();
                existing.description = org.description.clone();
                existing.attributes = org.attributes.clone();
                existing.updated_at = org.updated_at;
                Ok(Applied::Done)
            }
            Mutation::MarkOrganizationSynced { id, remote_id, at } => {
                self.check_unique_remote_id(*id, remote_id)?;
                let org = self
                    .organizations
                    .get_mut(id)
                    .ok_or_else(|| StoreError::NotFound(format!("organization {}", id)))?;
                if let Some(existing) = &org.remote_id {
                    if existing != remote_id {
                        return Err(StoreError::RemoteIdAlreadyAssigned {
                            entity: "organization",
                            id: id.to_string(),
                        });
                    }
                }
                org.remote_id = Some(remote_id.clone());
                org.synced_at = Some(*at);
                org.sync_error = None;
                Ok(Applied::Done)
            }
            Mutation::OrganizationSyncError { id, message } => {
                if let Some(org) = self.organizations.get_mut(id) {
                    org.sync_error = Some(message.clone());
                }
                Ok(Applied::Done)
            }
            Mutation::SoftDeleteOrganization { id, at } => {
                let changed = match self.organizations.get_mut(id) {
                    Some(org) if org.deleted_at.is_none() => {
                        org.deleted_at = Some(*at);
                        org.updated_at = *at;
                        true
                    }
                    _ => false,
                };
                Ok(Applied::Flag(changed))
            }
            Mutation::SuspendOrganization { id, at } => {
                let changed = match self.organizations.get_mut(id) {
                    Some(org) if org.deleted_at.is_none() && org.active => {
                        org.active = false;
                        org.suspended_at = Some(*at);
                        org.suspended_by_org_id = None;
                        true
                    }
                    _ => false,
                };
                Ok(Applied::Flag(changed))
            }
            Mutation::ReactivateOrganization { id } => {
                let changed = match self.organizations.get_mut(id) {
                    Some(org) if org.deleted_at.is_none() && !org.active => {
                        org.active = true;
                        org.suspended_at = None;
                        org.suspended_by_org_id = None;
                        true
                    }
                    _ => false,
                };
                Ok(Applied::Flag(changed))
            }
            Mutation::SuspendOrganizations { remote_ids, by, at } => {
                let mut count = 0;
                for org in self.organizations.values_mut() {
                    let listed = org.remote_id.as_ref().map(|r| remote_ids.contains(r)).unwrap_or(false);
                    if listed && org.active && org.deleted_at.is_none() {
                        org.active = false;
                        org.suspended_at = Some(*at);
                        org.suspended_by_org_id = Some(by.clone());
                        count += 1;
                    }
                }
                Ok(Applied::Count(count))
            }
            Mutation::ReactivateOrganizationsBy { by } => {
                let mut count = 0;
                for org in self.organizations.values_mut() {
                    if org.deleted_at.is_none() && org.suspended_by_org_id.as_deref() == Some(by.as_str()) {
                        org.active = true;
                        org.suspended_at = None;
                        org.suspended_by_org_id = None;
                        count += 1;
                    }
                }
                Ok(Applied::Count(count))
            }
            Mutation::InsertUser(user) => {
                if self.users.contains_key(&user.id) {
                    return Err(StoreError::Conflict(format!("user {} already exists", user.id)));
                }
                self.users.insert(user.id, user.clone());
                Ok(Applied::Done)
            }
            Mutation::UpdateUser(user) => {
                let existing = self
                    .users
                    .get_mut(&user.id)
                    .filter(|u| u.deleted_at.is_none())
                    .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;
                existing.name = user.name.clone();
                existing.email = user.email.clone();
                existing.phone = user.phone.clone();
                existing.custom_data = user.custom_data.clone();
                existing.updated_at = user.updated_at;
                Ok(Applied::Done)
            }
            Mutation::MarkUserSynced { id, remote_id, at } => {
                let user = self
                    .users
                    .get_mut(id)
                    .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
                if let Some(existing) = &user.remote_id {
                    if existing != remote_id {
                        return Err(StoreError::RemoteIdAlreadyAssigned {
                            entity: "user",
                            id: id.to_string(),
                        });
                    }
                }
                user.remote_id = Some(remote_id.clone());
                user.synced_at = Some(*at);
                user.sync_error = None;
                Ok(Applied::Done)
            }
            Mutation::UserSyncError { id, message } => {
                if let Some(user) = self.users.get_mut(id) {
                    user.sync_error = Some(message.clone());
                }
                Ok(Applied::Done)
            }
            Mutation::SoftDeleteUser { id, at } => {
                let changed = match self.users.get_mut(id) {
                    Some(user) if user.deleted_at.is_none() => {
                        user.deleted_at = Some(*at);
                        user.updated_at = *at;
                        true
                    }
                    _ => false,
                };
                Ok(Applied::Flag(changed))
            }
            Mutation::SetUserSuspended { id, at } => {
                let changed = match self.users.get_mut(id) {
                    Some(user) if user.deleted_at.is_none() => {
                        user.suspended_at = *at;
                        user.suspended_by_org_id = None;
                        true
                    }
                    _ => false,
                };
                Ok(Applied::Flag(changed))
            }
            Mutation::SuspendUsers { org_ids, by, at } => {
                let mut affected = Vec::new();
                for user in self.users.values_mut() {
                    if org_ids.contains(&user.organization_id) && user.deleted_at.is_none() && user.suspended_at.is_none() {
                        user.suspended_at = Some(*at);
                        user.suspended_by_org_id = Some(by.clone());
                        affected.push(user.clone());
                    }
                }
                Ok(Applied::Users(affected))
            }
            Mutation::ReactivateUsersBy { by } => {
                let mut affected = Vec::new();
                for user in self.users.values_mut() {
                    if user.deleted_at.is_none() && user.suspended_by_org_id.as_deref() == Some(by.as_str()) {
                        user.suspended_at = None;
                        user.suspended_by_org_id = None;
                        affected.push(user.clone());
                    }
                }
                Ok(Applied::Users(affected))
            }
            Mutation::InsertSystem(system) => {
                if self.systems.contains_key(&system.id) {
                    return Err(StoreError::Conflict(format!("system {} already exists", system.id)));
                }
                self.systems.insert(system.id, system.clone());
                Ok(Applied::Done)
            }
            Mutation::SoftDeleteSystem { id, at } => {
                let changed = match self.systems.get_mut(id) {
                    Some(system) if system.deleted_at.is_none() => {
                        system.deleted_at = Some(*at);
                        system.updated_at = *at;
                        true
                    }
                    _ => false,
                };
                Ok(Applied::Flag(changed))
            }
            Mutation::SoftDeleteSystemsByCreators { org_ids, at } => {
                let mut count = 0;
                for system in self.systems.values_mut() {
                    if org_ids.contains(&system.creator_org_id) && system.deleted_at.is_none() {
                        system.deleted_at = Some(*at);
                        system.updated_at = *at;
                        count += 1;
                    }
                }
                Ok(Applied::Count(count))
            }
            Mutation::SuspendSystems { org_ids, by, at } => {
                let mut count = 0;
                for system in self.systems.values_mut() {
                    if org_ids.contains(&system.creator_org_id) && system.deleted_at.is_none() && system.suspended_at.is_none() {
                        system.suspended_at = Some(*at);
                        system.suspended_by_org_id = Some(by.clone());
                        count += 1;
                    }
                }
                Ok(Applied::Count(count))
            }
            Mutation::ReactivateSystemsBy { by } => {
                let mut count = 0;
                for system in self.systems.values_mut() {
                    if system.deleted_at.is_none() && system.suspended_by_org_id.as_deref() == Some(by.as_str()) {
                        system.suspended_at = None;
                        system.suspended_by_org_id = None;
                        count += 1;
                    }
                }
                Ok(Applied::Count(count))
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<MemoryState>,
    faults: Mutex<HashMap<FailPoint, usize>>,
}

impl Inner {
    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Consume one armed failure for `point`, if any
    fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        if let Some(remaining) = faults.get_mut(&point) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!("injected failure at {:?}", point)));
            }
        }
        Ok(())
    }
}

/// Shared in-process store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` operations at `point` fail
    pub fn inject_failure(&self, point: FailPoint, times: usize) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.insert(point, times);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.clear();
        }
    }

    /// Every organization, including soft-deleted ones
    pub fn organizations(&self) -> Vec<Organization> {
        self.inner
            .read()
            .map(|s| s.organizations.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every user, including soft-deleted ones
    pub fn users(&self) -> Vec<User> {
        self.inner
            .read()
            .map(|s| s.users.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every system, including soft-deleted ones
    pub fn systems(&self) -> Vec<System> {
        self.inner
            .read()
            .map(|s| s.systems.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        self.inner.trip(FailPoint::Begin)?;
        let staged = self.inner.read()?.clone();
        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            staged,
            log: Vec::new(),
        }))
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        Ok(self.inner.read()?.organizations.get(&id).cloned())
    }

    async fn find_organization_by_remote_id(&self, remote_id: &str) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .inner
            .read()?
            .organizations
            .values()
            .find(|o| o.deleted_at.is_none() && o.remote_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn find_organization_node(&self, remote_id: &str) -> Result<Option<OrgNode>, StoreError> {
        Ok(self
            .find_organization_by_remote_id(remote_id)
            .await?
            .and_then(|o| o.node()))
    }

    async fn list_organization_nodes(&self) -> Result<Vec<OrgNode>, StoreError> {
        let state = self.inner.read()?;
        let mut nodes: Vec<OrgNode> = state
            .organizations
            .values()
            .filter(|o| o.deleted_at.is_none())
            .filter_map(Organization::node)
            .collect();
        nodes.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(nodes)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read()?.users.get(&id).cloned())
    }

    async fn list_users_by_organizations(&self, org_ids: &[String]) -> Result<Vec<User>, StoreError> {
        let state = self.inner.read()?;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.deleted_at.is_none() && org_ids.contains(&u.organization_id))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn get_system(&self, id: Uuid) -> Result<Option<System>, StoreError> {
        Ok(self.inner.read()?.systems.get(&id).cloned())
    }

    async fn list_system_ids_by_creators(&self, org_ids: &[String]) -> Result<Vec<Uuid>, StoreError> {
        let state = self.inner.read()?;
        Ok(state
            .systems
            .values()
            .filter(|s| s.deleted_at.is_none() && org_ids.contains(&s.creator_org_id))
            .map(|s| s.id)
            .collect())
    }
}

/// Staged transaction over a `MemoryStore`
struct MemoryTx {
    inner: Arc<Inner>,
    staged: MemoryState,
    log: Vec<Mutation>,
}

impl MemoryTx {
    fn stage(&mut self, point: Option<FailPoint>, mutation: Mutation) -> Result<Applied, StoreError> {
        if let Some(point) = point {
            self.inner.trip(point)?;
        }
        let applied = self.staged.apply(&mutation)?;
        self.log.push(mutation);
        Ok(applied)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        self.stage(Some(FailPoint::InsertOrganization), Mutation::InsertOrganization(org.clone()))?;
        Ok(())
    }

    async fn update_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        self.stage(Some(FailPoint::UpdateOrganization), Mutation::UpdateOrganization(org.clone()))?;
        Ok(())
    }

    async fn mark_organization_synced(&mut self, id: Uuid, remote_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.stage(
            None,
            Mutation::MarkOrganizationSynced {
                id,
                remote_id: remote_id.to_string(),
                at,
            },
        )?;
        Ok(())
    }

    async fn record_organization_sync_error(&mut self, id: Uuid, message: &str) -> Result<(), StoreError> {
        self.stage(
            None,
            Mutation::OrganizationSyncError {
                id,
                message: message.to_string(),
            },
        )?;
        Ok(())
    }

    async fn soft_delete_organization(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .stage(Some(FailPoint::SoftDeleteOrganization), Mutation::SoftDeleteOrganization { id, at })?
            .flag())
    }

    async fn suspend_organization(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.stage(None, Mutation::SuspendOrganization { id, at })?.flag())
    }

    async fn reactivate_organization(&mut self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.stage(None, Mutation::ReactivateOrganization { id })?.flag())
    }

    async fn suspend_organizations(&mut self, remote_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .stage(
                None,
                Mutation::SuspendOrganizations {
                    remote_ids: remote_ids.to_vec(),
                    by: by.to_string(),
                    at,
                },
            )?
            .count())
    }

    async fn reactivate_organizations_suspended_by(&mut self, by: &str) -> Result<u64, StoreError> {
        Ok(self
            .stage(None, Mutation::ReactivateOrganizationsBy { by: by.to_string() })?
            .count())
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.stage(Some(FailPoint::InsertUser), Mutation::InsertUser(user.clone()))?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.stage(Some(FailPoint::UpdateUser), Mutation::UpdateUser(user.clone()))?;
        Ok(())
    }

    async fn mark_user_synced(&mut self, id: Uuid, remote_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.stage(
            None,
            Mutation::MarkUserSynced {
                id,
                remote_id: remote_id.to_string(),
                at,
            },
        )?;
        Ok(())
    }

    async fn record_user_sync_error(&mut self, id: Uuid, message: &str) -> Result<(), StoreError> {
        self.stage(
            None,
            Mutation::UserSyncError {
                id,
                message: message.to_string(),
            },
        )?;
        Ok(())
    }

    async fn soft_delete_user(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .stage(Some(FailPoint::SoftDeleteUser), Mutation::SoftDeleteUser { id, at })?
            .flag())
    }

    async fn set_user_suspended(&mut self, id: Uuid, at: Option<DateTime<Utc>>) -> Result<bool, StoreError> {
        Ok(self
            .stage(Some(FailPoint::SetUserSuspended), Mutation::SetUserSuspended { id, at })?
            .flag())
    }

    async fn suspend_users(&mut self, org_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<Vec<User>, StoreError> {
        Ok(self
            .stage(
                None,
                Mutation::SuspendUsers {
                    org_ids: org_ids.to_vec(),
                    by: by.to_string(),
                    at,
                },
            )?
            .users())
    }

    async fn reactivate_users_suspended_by(&mut self, by: &str) -> Result<Vec<User>, StoreError> {
        Ok(self
            .stage(None, Mutation::ReactivateUsersBy { by: by.to_string() })?
            .users())
    }

    async fn insert_system(&mut self, system: &System) -> Result<(), StoreError> {
        self.stage(None, Mutation::InsertSystem(system.clone()))?;
        Ok(())
    }

    async fn soft_delete_system(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.stage(None, Mutation::SoftDeleteSystem { id, at })?.flag())
    }

    async fn soft_delete_systems_by_creators(&mut self, org_ids: &[String], at: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .stage(
                None,
                Mutation::SoftDeleteSystemsByCreators {
                    org_ids: org_ids.to_vec(),
                    at,
                },
            )?
            .count())
    }

    async fn suspend_systems(&mut self, org_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .stage(
                None,
                Mutation::SuspendSystems {
                    org_ids: org_ids.to_vec(),
                    by: by.to_string(),
                    at,
                },
            )?
            .count())
    }

    async fn reactivate_systems_suspended_by(&mut self, by: &str) -> Result<u64, StoreError> {
        Ok(self
            .stage(None, Mutation::ReactivateSystemsBy { by: by.to_string() })?
            .count())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.trip(FailPoint::Commit)?;
        let mut live = self
            .inner
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        let mut next = live.clone();
        for mutation in &self.log {
            next.apply(mutation)?;
        }
        *live = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::OrgAttributes;
    use crate::types::OrgKind;
    use serde_json::json;

    fn org(kind: OrgKind, vat: &str, parent: Option<&str>) -> Organization {
        let patch = json!({ "vat": vat }).as_object().cloned().unwrap();
        let attrs = OrgAttributes::for_create(kind, parent.map(str::to_string), Utc::now(), &patch).unwrap();
        Organization::draft("Acme", "", attrs, Utc::now())
    }

    #[tokio::test]
    async fn uncommitted_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let o = org(OrgKind::Distributor, "V1", None);
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_organization(&o).await.unwrap();
        }
        assert!(store.get_organization(o.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_organization(&o).await.unwrap();
        tx.mark_organization_synced(o.id, "remote-1", Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_organization(o.id).await.unwrap().unwrap();
        assert_eq!(stored.remote_id.as_deref(), Some("remote-1"));
        assert!(stored.synced_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_vat_is_a_conflict() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_organization(&org(OrgKind::Customer, "DUP", None)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_organization(&org(OrgKind::Customer, " DUP ", None)).await.unwrap_err();
        assert!(err.to_string().contains("VAT already exists"));

        // Same VAT under another kind is fine
        tx.insert_organization(&org(OrgKind::Reseller, "DUP", None)).await.unwrap();
    }

    #[tokio::test]
    async fn remote_id_is_assigned_once() {
        let store = MemoryStore::new();
        let o = org(OrgKind::Distributor, "V", None);
        let mut tx = store.begin().await.unwrap();
        tx.insert_organization(&o).await.unwrap();
        tx.mark_organization_synced(o.id, "r1", Utc::now()).await.unwrap();
        tx.mark_organization_synced(o.id, "r1", Utc::now()).await.unwrap();
        let err = tx.mark_organization_synced(o.id, "r2", Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::RemoteIdAlreadyAssigned { .. }));
    }

    #[tokio::test]
    async fn concurrent_transactions_do_not_clobber() {
        let store = MemoryStore::new();
        let a = org(OrgKind::Customer, "A", None);
        let b = org(OrgKind::Customer, "B", None);

        let mut tx_a = store.begin().await.unwrap();
        let mut tx_b = store.begin().await.unwrap();
        tx_a.insert_organization(&a).await.unwrap();
        tx_b.insert_organization(&b).await.unwrap();
        tx_a.commit().await.unwrap();
        tx_b.commit().await.unwrap();

        assert_eq!(store.organizations().len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.inject_failure(FailPoint::Begin, 1);
        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_ok());
    }
}
