use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::authorize;
use super::saga::{Saga, SagaStep};
use crate::database::models::{username_from_email, User};
use crate::database::{LocalStore, StoreError};
use crate::error::{ServiceError, ValidationErrors};
use crate::hierarchy::HierarchyCache;
use crate::idp::{IdentityProvider, NewRemoteUser, RemoteUser, UserProfilePayload};
use crate::types::{Actor, Role};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUserRequest {
    /// Generated from the email when absent
    #[serde(default)]
    pub username: Option<String>,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Remote ID of the organization the user joins
    pub organization_id: String,
    /// Tenant-wide role IDs
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub custom_data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub custom_data: Option<Map<String, Value>>,
}

/// User lifecycle across the local store and the identity provider
pub struct UserSync {
    store: Arc<dyn LocalStore>,
    idp: Arc<dyn IdentityProvider>,
    hierarchy: Arc<HierarchyCache>,
}

impl UserSync {
    pub fn new(store: Arc<dyn LocalStore>, idp: Arc<dyn IdentityProvider>, hierarchy: Arc<HierarchyCache>) -> Self {
        Self { store, idp, hierarchy }
    }

    pub async fn create_user(&self, actor: &Actor, request: CreateUserRequest) -> Result<User, ServiceError> {
        let mut errors = ValidationErrors::new();
        validate_email(&request.email, &mut errors);
        validate_name(&request.name, &mut errors);
        if request.organization_id.trim().is_empty() {
            errors.push("organization_id", "required", "");
        }
        errors.into_result()?;

        let org_id = request.organization_id.trim().to_string();
        authorize(&self.hierarchy, actor, &org_id).await?;
        let org_role = if actor.role == Role::Owner && org_id == actor.org_id {
            "Owner"
        } else {
            self.store
                .find_organization_by_remote_id(&org_id)
                .await?
                .ok_or_else(|| ServiceError::not_found(format!("organization {}", org_id)))?
                .kind()
                .role_name()
        };

        let username = request
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| username_from_email(request.email.trim()));

        let mut custom_data = request.custom_data.clone();
        custom_data.insert("createdBy".into(), Value::String(actor.org_id.clone()));
        custom_data.insert("organizationId".into(), Value::String(org_id.clone()));

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            remote_id: None,
            username: username.clone(),
            email: request.email.trim().to_string(),
            name: request.name.trim().to_string(),
            phone: request.phone.clone().filter(|p| !p.trim().is_empty()),
            organization_id: org_id,
            role_ids: request.role_ids.clone(),
            custom_data: custom_data.clone(),
            suspended_at: None,
            suspended_by_org_id: None,
            synced_at: None,
            sync_error: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut ctx = CreateUserContext {
            new_remote: NewRemoteUser {
                username,
                primary_email: user.email.clone(),
                name: user.name.clone(),
                primary_phone: user.phone.clone(),
                password: request.password.clone(),
                custom_data,
            },
            user,
            org_role,
            remote: None,
        };

        Saga::new("create_user")
            .step(CreateRemoteUser {
                idp: Arc::clone(&self.idp),
            })
            .step(AssignUserRoles {
                idp: Arc::clone(&self.idp),
            })
            .step(JoinOrganization {
                idp: Arc::clone(&self.idp),
            })
            .step(AssignMembershipRole {
                idp: Arc::clone(&self.idp),
            })
            .step(PersistUser {
                store: Arc::clone(&self.store),
            })
            .run(&mut ctx)
            .await?;

        info!(
            user_id = %ctx.user.id,
            remote_id = ?ctx.user.remote_id,
            org_id = %ctx.user.organization_id,
            created_by = %actor.user_id,
            "user created"
        );
        Ok(ctx.user)
    }

    pub async fn update_user(&self, actor: &Actor, id: Uuid, request: UpdateUserRequest) -> Result<User, ServiceError> {
        let before = self.load_authorized(actor, id).await?;
        let remote_id = synced(&before)?;

        let mut errors = ValidationErrors::new();
        if let Some(email) = &request.email {
            validate_email(email, &mut errors);
        }
        if let Some(name) = &request.name {
            validate_name(name, &mut errors);
        }
        errors.into_result()?;

        let mut after = before.clone();
        if let Some(name) = &request.name {
            after.name = name.trim().to_string();
        }
        if let Some(email) = &request.email {
            after.email = email.trim().to_string();
        }
        if let Some(phone) = &request.phone {
            after.phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
        }
        if let Some(custom_data) = &request.custom_data {
            after.custom_data.extend(custom_data.clone());
        }
        after.updated_at = Utc::now();

        let mut ctx = UpdateUserContext { remote_id, before, after };
        Saga::new("update_user")
            .step(UpdateRemoteUser {
                idp: Arc::clone(&self.idp),
            })
            .step(PersistUserUpdate {
                store: Arc::clone(&self.store),
            })
            .run(&mut ctx)
            .await?;

        info!(user_id = %id, updated_by = %actor.user_id, "user updated");
        Ok(ctx.after)
    }

    /// Independent suspension of one user
    pub async fn suspend_user(&self, actor: &Actor, id: Uuid) -> Result<User, ServiceError> {
        let user = self.load_authorized(actor, id).await?;
        if user.is_suspended() {
            return Err(ServiceError::InvalidTransition(format!("user {} is already suspended", id)));
        }
        self.set_suspended(actor, user, true).await
    }

    /// Clear an independent suspension. Cascade suspensions are cleared by reactivating their organization.
    pub async fn reactivate_user(&self, actor: &Actor, id: Uuid) -> Result<User, ServiceError> {
        let user = self.load_authorized(actor, id).await?;
        if !user.is_suspended() {
            return Err(ServiceError::InvalidTransition(format!("user {} is not suspended", id)));
        }
        if let Some(by) = &user.suspended_by_org_id {
            return Err(ServiceError::InvalidTransition(format!(
                "user {} was suspended by organization {}",
                id, by
            )));
        }
        self.set_suspended(actor, user, false).await
    }

    /// Soft-delete locally, then delete remotely
    pub async fn delete_user(&self, actor: &Actor, id: Uuid) -> Result<(), ServiceError> {
        let user = self.load_authorized(actor, id).await?;

        let mut tx = self.store.begin().await?;
        tx.soft_delete_user(user.id, Utc::now()).await?;
        tx.commit().await?;

        if let Some(remote_id) = &user.remote_id {
            if let Err(err) = self.idp.delete_user(remote_id).await {
                if err.is_not_found() {
                    debug!(remote_id = %remote_id, "remote user already gone");
                } else {
                    error!(user_id = %id, remote_id = %remote_id, error = %err, "remote user delete failed");
                    if let Err(store_err) = self.record_sync_error(id, &err.to_string()).await {
                        error!(user_id = %id, error = %store_err, "failed to record sync error");
                    }
                    return Err(ServiceError::Sync(err));
                }
            }
        }

        info!(user_id = %id, deleted_by = %actor.user_id, "user deleted");
        Ok(())
    }

    async fn set_suspended(&self, actor: &Actor, user: User, suspended: bool) -> Result<User, ServiceError> {
        let remote_id = synced(&user)?;

        let mut ctx = SuspensionContext {
            remote_id,
            user,
            at: Utc::now(),
        };
        Saga::new(if suspended { "suspend_user" } else { "reactivate_user" })
            .step(SetRemoteSuspension {
                idp: Arc::clone(&self.idp),
                suspended,
            })
            .step(PersistSuspension {
                store: Arc::clone(&self.store),
                suspended,
            })
            .run(&mut ctx)
            .await?;

        info!(user_id = %ctx.user.id, suspended, by = %actor.user_id, "user suspension changed");
        Ok(ctx.user)
    }

    /// Live user within the actor's reach
    async fn load_authorized(&self, actor: &Actor, id: Uuid) -> Result<User, ServiceError> {
        let user = self
            .store
            .get_user(id)
            .await?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| ServiceError::not_found(format!("user {}", id)))?;
        authorize(&self.hierarchy, actor, &user.organization_id).await?;
        Ok(user)
    }

    async fn record_sync_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        tx.record_user_sync_error(id, message).await?;
        tx.commit().await
    }
}

fn validate_email(email: &str, errors: &mut ValidationErrors) {
    let email = email.trim();
    if email.is_empty() {
        errors.push("email", "required", "");
    } else if !email.contains('@') {
        errors.push("email", "invalid_format", email);
    }
}

fn validate_name(name: &str, errors: &mut ValidationErrors) {
    if name.trim().is_empty() {
        errors.push("name", "cannot_be_empty", name);
    }
}

fn synced(user: &User) -> Result<String, ServiceError> {
    user.remote_id
        .clone()
        .ok_or_else(|| ServiceError::not_found(format!("user {} not synced", user.id)))
}

fn profile(user: &User) -> UserProfilePayload {
    UserProfilePayload {
        name: Some(user.name.clone()),
        primary_email: Some(user.email.clone()),
        primary_phone: user.phone.clone(),
        custom_data: Some(user.custom_data.clone()),
    }
}

struct CreateUserContext {
    user: User,
    new_remote: NewRemoteUser,
    /// Organization-scoped role granted on join
    org_role: &'static str,
    remote: Option<RemoteUser>,
}

impl CreateUserContext {
    fn remote_id(&self) -> Result<&str, ServiceError> {
        self.remote
            .as_ref()
            .map(|r| r.id.as_str())
            .ok_or_else(|| ServiceError::internal("remote user not created"))
    }
}

struct CreateRemoteUser {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<CreateUserContext> for CreateRemoteUser {
    fn name(&self) -> &'static str {
        "create_remote_user"
    }

    async fn forward(&self, ctx: &mut CreateUserContext) -> Result<(), ServiceError> {
        let created = self.idp.create_user(&ctx.new_remote).await?;
        debug!(user_id = %ctx.user.id, remote_id = %created.id, "remote user created");
        ctx.remote = Some(created);
        Ok(())
    }

    fn compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, ctx: &CreateUserContext) -> Result<(), ServiceError> {
        let remote_id = ctx.remote_id()?;
        self.idp.delete_user(remote_id).await?;
        info!(user_id = %ctx.user.id, remote_id, "rolled back remote user");
        Ok(())
    }
}

struct AssignUserRoles {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<CreateUserContext> for AssignUserRoles {
    fn name(&self) -> &'static str {
        "assign_user_roles"
    }

    async fn forward(&self, ctx: &mut CreateUserContext) -> Result<(), ServiceError> {
        if ctx.user.role_ids.is_empty() {
            return Ok(());
        }
        self.idp.assign_user_roles(ctx.remote_id()?, &ctx.user.role_ids).await?;
        Ok(())
    }
}

struct JoinOrganization {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<CreateUserContext> for JoinOrganization {
    fn name(&self) -> &'static str {
        "join_organization"
    }

    async fn forward(&self, ctx: &mut CreateUserContext) -> Result<(), ServiceError> {
        self.idp
            .assign_user_to_organization(&ctx.user.organization_id, ctx.remote_id()?)
            .await?;
        Ok(())
    }
}

struct AssignMembershipRole {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<CreateUserContext> for AssignMembershipRole {
    fn name(&self) -> &'static str {
        "assign_membership_role"
    }

    async fn forward(&self, ctx: &mut CreateUserContext) -> Result<(), ServiceError> {
        let role = self.idp.find_organization_role(ctx.org_role).await?;
        self.idp
            .assign_organization_roles(&ctx.user.organization_id, ctx.remote_id()?, &[role.id])
            .await?;
        Ok(())
    }
}

struct PersistUser {
    store: Arc<dyn LocalStore>,
}

#[async_trait]
impl SagaStep<CreateUserContext> for PersistUser {
    fn name(&self) -> &'static str {
        "persist_user"
    }

    async fn forward(&self, ctx: &mut CreateUserContext) -> Result<(), ServiceError> {
        let remote_id = ctx.remote_id()?.to_string();
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        tx.insert_user(&ctx.user).await?;
        tx.mark_user_synced(ctx.user.id, &remote_id, now).await?;
        tx.commit().await?;

        ctx.user.remote_id = Some(remote_id);
        ctx.user.synced_at = Some(now);
        Ok(())
    }
}

struct UpdateUserContext {
    remote_id: String,
    before: User,
    after: User,
}

struct UpdateRemoteUser {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<UpdateUserContext> for UpdateRemoteUser {
    fn name(&self) -> &'static str {
        "update_remote_user"
    }

    async fn forward(&self, ctx: &mut UpdateUserContext) -> Result<(), ServiceError> {
        self.idp.update_user(&ctx.remote_id, &profile(&ctx.after)).await?;
        Ok(())
    }

    fn compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, ctx: &UpdateUserContext) -> Result<(), ServiceError> {
        self.idp.update_user(&ctx.remote_id, &profile(&ctx.before)).await?;
        info!(remote_id = %ctx.remote_id, "reverted remote user");
        Ok(())
    }
}

struct PersistUserUpdate {
    store: Arc<dyn LocalStore>,
}

#[async_trait]
impl SagaStep<UpdateUserContext> for PersistUserUpdate {
    fn name(&self) -> &'static str {
        "persist_user_update"
    }

    async fn forward(&self, ctx: &mut UpdateUserContext) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        tx.update_user(&ctx.after).await?;
        tx.commit().await?;
        Ok(())
    }
}

struct SuspensionContext {
    remote_id: String,
    user: User,
    at: DateTime<Utc>,
}

struct SetRemoteSuspension {
    idp: Arc<dyn IdentityProvider>,
    suspended: bool,
}

#[async_trait]
impl SagaStep<SuspensionContext> for SetRemoteSuspension {
    fn name(&self) -> &'static str {
        "set_remote_suspension"
    }

    async fn forward(&self, ctx: &mut SuspensionContext) -> Result<(), ServiceError> {
        self.idp.set_user_suspended(&ctx.remote_id, self.suspended).await?;
        Ok(())
    }

    fn compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, ctx: &SuspensionContext) -> Result<(), ServiceError> {
        self.idp.set_user_suspended(&ctx.remote_id, !self.suspended).await?;
        Ok(())
    }
}

struct PersistSuspension {
    store: Arc<dyn LocalStore>,
    suspended: bool,
}

#[async_trait]
impl SagaStep<SuspensionContext> for PersistSuspension {
    fn name(&self) -> &'static str {
        "persist_suspension"
    }

    async fn forward(&self, ctx: &mut SuspensionContext) -> Result<(), ServiceError> {
        let at = self.suspended.then_some(ctx.at);
        let mut tx = self.store.begin().await?;
        tx.set_user_suspended(ctx.user.id, at).await?;
        tx.commit().await?;

        ctx.user.suspended_at = at;
        ctx.user.suspended_by_org_id = None;
        Ok(())
    }
}
