use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{
    IdentityProvider, NewRemoteUser, OrganizationPayload, RemoteError, RemoteOrganization, RemoteUser, RoleDefinition,
    UserProfilePayload,
};

/// One entry per remote operation, used to script failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdpCall {
    CreateOrganization,
    UpdateOrganization,
    DeleteOrganization,
    CreateUser,
    UpdateUser,
    DeleteUser,
    SetUserSuspended,
    AssignUserToOrganization,
    AssignUserRoles,
    AssignOrganizationRoles,
    FindOrganizationRole,
    SetJitRoles,
}

#[derive(Debug, Default)]
struct IdpState {
    organizations: HashMap<String, RemoteOrganization>,
    users: HashMap<String, RemoteUser>,
    organization_roles: Vec<RoleDefinition>,
    jit_roles: HashMap<String, Vec<String>>,
    members: HashMap<String, BTreeSet<String>>,
    user_roles: HashMap<String, Vec<String>>,
    member_roles: HashMap<(String, String), Vec<String>>,
    failures: HashMap<IdpCall, (usize, RemoteError)>,
    calls: HashMap<IdpCall, usize>,
    latency: HashMap<IdpCall, Duration>,
}

/// In-process identity provider with scripted failures and per-call latency
#[derive(Debug, Clone)]
pub struct MemoryIdentityProvider {
    state: Arc<Mutex<IdpState>>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    /// Seeded with one organization role per kind plus `Owner`
    pub fn new() -> Self {
        let organization_roles = ["Owner", "Distributor", "Reseller", "Customer"]
            .iter()
            .map(|name| RoleDefinition {
                id: format!("role-{}", name.to_lowercase()),
                name: name.to_string(),
                description: None,
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(IdpState {
                organization_roles,
                ..IdpState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdpState> {
        // A panicked test thread must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `times` calls of `call` fail with `error`
    pub fn fail(&self, call: IdpCall, times: usize, error: RemoteError) {
        self.lock().failures.insert(call, (times, error));
    }

    pub fn set_latency(&self, call: IdpCall, latency: Duration) {
        self.lock().latency.insert(call, latency);
    }

    /// Number of attempts made for `call`, failed ones included
    pub fn calls(&self, call: IdpCall) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn organization(&self, id: &str) -> Option<RemoteOrganization> {
        self.lock().organizations.get(id).cloned()
    }

    pub fn user(&self, id: &str) -> Option<RemoteUser> {
        self.lock().users.get(id).cloned()
    }

    pub fn organization_count(&self) -> usize {
        self.lock().organizations.len()
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn jit_roles(&self, org_id: &str) -> Vec<String> {
        self.lock().jit_roles.get(org_id).cloned().unwrap_or_default()
    }

    pub fn is_member(&self, org_id: &str, user_id: &str) -> bool {
        self.lock()
            .members
            .get(org_id)
            .map(|m| m.contains(user_id))
            .unwrap_or(false)
    }

    pub fn organization_roles_of(&self, org_id: &str, user_id: &str) -> Vec<String> {
        self.lock()
            .member_roles
            .get(&(org_id.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn user_roles(&self, user_id: &str) -> Vec<String> {
        self.lock().user_roles.get(user_id).cloned().unwrap_or_default()
    }

    /// Count the call, wait out its latency, then consume a scripted failure if any
    async fn enter(&self, call: IdpCall) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.lock();
            *state.calls.entry(call).or_insert(0) += 1;
            state.latency.get(&call).copied()
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some((remaining, error)) = state.failures.get_mut(&call) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

fn not_found(entity: &str, id: &str) -> RemoteError {
    RemoteError::from_status(
        404,
        &json!({ "code": "entity.not_exists", "message": format!("{} {} does not exist", entity, id) }).to_string(),
    )
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_organization(&self, payload: &OrganizationPayload) -> Result<RemoteOrganization, RemoteError> {
        self.enter(IdpCall::CreateOrganization).await?;
        let org = RemoteOrganization {
            id: Uuid::new_v4().simple().to_string(),
            name: payload.name.clone(),
            description: Some(payload.description.clone()),
            custom_data: payload.custom_data.clone(),
        };
        self.lock().organizations.insert(org.id.clone(), org.clone());
        Ok(org)
    }

    async fn update_organization(&self, id: &str, payload: &OrganizationPayload) -> Result<RemoteOrganization, RemoteError> {
        self.enter(IdpCall::UpdateOrganization).await?;
        let mut state = self.lock();
        let org = state
            .organizations
            .get_mut(id)
            .ok_or_else(|| not_found("organization", id))?;
        org.name = payload.name.clone();
        org.description = Some(payload.description.clone());
        org.custom_data = payload.custom_data.clone();
        Ok(org.clone())
    }

    async fn delete_organization(&self, id: &str) -> Result<(), RemoteError> {
        self.enter(IdpCall::DeleteOrganization).await?;
        let mut state = self.lock();
        state
            .organizations
            .remove(id)
            .ok_or_else(|| not_found("organization", id))?;
        state.members.remove(id);
        state.jit_roles.remove(id);
        Ok(())
    }

    async fn create_user(&self, user: &NewRemoteUser) -> Result<RemoteUser, RemoteError> {
        self.enter(IdpCall::CreateUser).await?;
        let mut state = self.lock();
        let taken = state.users.values().any(|u| {
            u.username.as_deref() == Some(user.username.as_str())
                || u.primary_email.as_deref() == Some(user.primary_email.as_str())
        });
        if taken {
            return Err(RemoteError::from_status(
                422,
                &json!({ "code": "user.username_already_in_use", "message": "This username is already in use." })
                    .to_string(),
            ));
        }

        let created = RemoteUser {
            id: Uuid::new_v4().simple().to_string(),
            username: Some(user.username.clone()),
            primary_email: Some(user.primary_email.clone()),
            name: Some(user.name.clone()),
            is_suspended: false,
        };
        state.users.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: &str, profile: &UserProfilePayload) -> Result<RemoteUser, RemoteError> {
        self.enter(IdpCall::UpdateUser).await?;
        let mut state = self.lock();
        let user = state.users.get_mut(id).ok_or_else(|| not_found("user", id))?;
        if let Some(name) = &profile.name {
            user.name = Some(name.clone());
        }
        if let Some(email) = &profile.primary_email {
            user.primary_email = Some(email.clone());
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, id: &str) -> Result<(), RemoteError> {
        self.enter(IdpCall::DeleteUser).await?;
        let mut state = self.lock();
        state.users.remove(id).ok_or_else(|| not_found("user", id))?;
        for members in state.members.values_mut() {
            members.remove(id);
        }
        state.user_roles.remove(id);
        Ok(())
    }

    async fn set_user_suspended(&self, id: &str, suspended: bool) -> Result<(), RemoteError> {
        self.enter(IdpCall::SetUserSuspended).await?;
        let mut state = self.lock();
        let user = state.users.get_mut(id).ok_or_else(|| not_found("user", id))?;
        user.is_suspended = suspended;
        Ok(())
    }

    async fn assign_user_to_organization(&self, org_id: &str, user_id: &str) -> Result<(), RemoteError> {
        self.enter(IdpCall::AssignUserToOrganization).await?;
        let mut state = self.lock();
        if !state.organizations.contains_key(org_id) {
            return Err(not_found("organization", org_id));
        }
        if !state.users.contains_key(user_id) {
            return Err(not_found("user", user_id));
        }
        state
            .members
            .entry(org_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(())
    }

    async fn assign_user_roles(&self, user_id: &str, role_ids: &[String]) -> Result<(), RemoteError> {
        self.enter(IdpCall::AssignUserRoles).await?;
        let mut state = self.lock();
        if !state.users.contains_key(user_id) {
            return Err(not_found("user", user_id));
        }
        state
            .user_roles
            .entry(user_id.to_string())
            .or_default()
            .extend(role_ids.iter().cloned());
        Ok(())
    }

    async fn assign_organization_roles(&self, org_id: &str, user_id: &str, role_ids: &[String]) -> Result<(), RemoteError> {
        self.enter(IdpCall::AssignOrganizationRoles).await?;
        let mut state = self.lock();
        let is_member = state
            .members
            .get(org_id)
            .map(|m| m.contains(user_id))
            .unwrap_or(false);
        if !is_member {
            return Err(not_found("organization member", user_id));
        }
        state
            .member_roles
            .entry((org_id.to_string(), user_id.to_string()))
            .or_default()
            .extend(role_ids.iter().cloned());
        Ok(())
    }

    async fn find_organization_role(&self, name: &str) -> Result<RoleDefinition, RemoteError> {
        self.enter(IdpCall::FindOrganizationRole).await?;
        self.lock()
            .organization_roles
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| RemoteError::transport(format!("organization role {} not found", name)))
    }

    async fn set_jit_roles(&self, org_id: &str, role_ids: &[String]) -> Result<(), RemoteError> {
        self.enter(IdpCall::SetJitRoles).await?;
        let mut state = self.lock();
        if !state.organizations.contains_key(org_id) {
            return Err(not_found("organization", org_id));
        }
        state.jit_roles.insert(org_id.to_string(), role_ids.to_vec());
        Ok(())
    }
}
