use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::cascade::{CascadeEngine, DeleteReport};
use super::saga::{Saga, SagaStep};
use super::{authorize, load_organization, record_org_sync_error, synced_remote_id};
use crate::database::models::{AttributePatch, OrgAttributes, Organization};
use crate::database::{LocalStore, StoreError};
use crate::error::{ServiceError, ValidationErrors};
use crate::hierarchy::HierarchyCache;
use crate::idp::{IdentityProvider, OrganizationPayload, RemoteOrganization};
use crate::types::{Actor, OrgKind, Role, Transition};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub custom_data: AttributePatch,
    /// Remote ID of the parent; defaults to the actor's organization
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrganizationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub custom_data: AttributePatch,
}

/// Organization create, update and delete across the local store and the identity provider.
///
/// Create and update write remotely first and undo the remote write when the
/// local write fails. Delete writes locally first.
pub struct SyncCoordinator {
    store: Arc<dyn LocalStore>,
    idp: Arc<dyn IdentityProvider>,
    hierarchy: Arc<HierarchyCache>,
    cascade: Arc<CascadeEngine>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        idp: Arc<dyn IdentityProvider>,
        hierarchy: Arc<HierarchyCache>,
        cascade: Arc<CascadeEngine>,
    ) -> Self {
        Self {
            store,
            idp,
            hierarchy,
            cascade,
        }
    }

    pub async fn create_organization(
        &self,
        actor: &Actor,
        kind: OrgKind,
        request: CreateOrganizationRequest,
    ) -> Result<Organization, ServiceError> {
        if !actor.role.can_create(kind) {
            return Err(ServiceError::access_denied(format!(
                "role {} cannot create {} organizations",
                actor.role, kind
            )));
        }
        let parent = self.resolve_parent(actor, kind, request.parent_id.as_deref()).await?;

        // Local validation; nothing has been written anywhere yet
        let now = Utc::now();
        let mut errors = ValidationErrors::new();
        if request.name.trim().is_empty() {
            errors.push("name", "cannot_be_empty", request.name.as_str());
        }
        let attributes = collect(OrgAttributes::for_create(kind, parent, now, &request.custom_data), &mut errors)?;
        errors.into_result()?;
        let Some(attributes) = attributes else {
            return Err(ServiceError::internal("attributes missing after validation"));
        };

        let mut ctx = CreateOrgContext {
            org: Organization::draft(&request.name, &request.description, attributes, now),
            remote: None,
        };

        Saga::new("create_organization")
            .step(CreateRemoteOrganization {
                idp: Arc::clone(&self.idp),
            })
            .step(ConfigureJitRoles {
                idp: Arc::clone(&self.idp),
            })
            .step(PersistOrganization {
                store: Arc::clone(&self.store),
            })
            .run(&mut ctx)
            .await?;

        self.hierarchy.invalidate_all();
        info!(
            org_id = %ctx.org.id,
            remote_id = ?ctx.org.remote_id,
            kind = %kind,
            created_by = %actor.user_id,
            "organization created"
        );
        Ok(ctx.org)
    }

    pub async fn update_organization(
        &self,
        actor: &Actor,
        id: Uuid,
        kind: OrgKind,
        request: UpdateOrganizationRequest,
    ) -> Result<Organization, ServiceError> {
        let before = load_organization(self.store.as_ref(), id).await?;
        if before.deleted_at.is_some() || before.kind() != kind {
            return Err(ServiceError::not_found(format!("{} {}", kind, id)));
        }
        let remote_id = synced_remote_id(&before)?;
        authorize(&self.hierarchy, actor, &remote_id).await?;

        let now = Utc::now();
        let mut errors = ValidationErrors::new();
        if let Some(name) = &request.name {
            if name.trim().is_empty() {
                errors.push("name", "cannot_be_empty", name.as_str());
            }
        }
        let attributes = collect(before.attributes.merged(&request.custom_data, &actor.org_id, now), &mut errors)?;
        errors.into_result()?;
        let Some(attributes) = attributes else {
            return Err(ServiceError::internal("attributes missing after validation"));
        };

        let mut after = before.clone();
        if let Some(name) = &request.name {
            after.name = name.trim().to_string();
        }
        if let Some(description) = &request.description {
            after.description = description.trim().to_string();
        }
        after.attributes = attributes;
        after.updated_at = now;

        let mut ctx = UpdateOrgContext { remote_id, before, after };

        Saga::new("update_organization")
            .step(UpdateRemoteOrganization {
                idp: Arc::clone(&self.idp),
            })
            .step(PersistOrganizationUpdate {
                store: Arc::clone(&self.store),
            })
            .run(&mut ctx)
            .await?;

        self.hierarchy.invalidate_all();
        info!(org_id = %id, remote_id = %ctx.remote_id, updated_by = %actor.user_id, "organization updated");
        Ok(ctx.after)
    }

    /// Soft-delete locally, cascade to dependents, then delete remotely
    pub async fn delete_organization(&self, actor: &Actor, id: Uuid, kind: OrgKind) -> Result<DeleteReport, ServiceError> {
        let org = load_organization(self.store.as_ref(), id).await?;
        if org.kind() != kind {
            return Err(ServiceError::not_found(format!("{} {}", kind, id)));
        }
        org.state().apply(Transition::Delete)?;
        let remote_id = synced_remote_id(&org)?;
        if remote_id == actor.org_id {
            return Err(ServiceError::access_denied("cannot delete your own organization"));
        }
        authorize(&self.hierarchy, actor, &remote_id).await?;

        // Dependents may be partly gone even when the cascade fails
        let report = match self.cascade.delete_dependents(&org).await {
            Ok(report) => report,
            Err(err) => {
                self.hierarchy.invalidate_all();
                return Err(err);
            }
        };

        let mut tx = self.store.begin().await?;
        tx.soft_delete_organization(org.id, Utc::now()).await?;
        tx.commit().await?;
        self.hierarchy.invalidate_all();

        if let Err(err) = self.idp.delete_organization(&remote_id).await {
            if err.is_not_found() {
                debug!(remote_id = %remote_id, "remote organization already gone");
            } else {
                error!(org_id = %org.id, remote_id = %remote_id, error = %err, "remote organization delete failed");
                if let Err(store_err) = record_org_sync_error(self.store.as_ref(), org.id, &err.to_string()).await {
                    error!(org_id = %org.id, error = %store_err, "failed to record sync error");
                }
                return Err(ServiceError::Sync(err));
            }
        }

        info!(
            org_id = %org.id,
            remote_id = %remote_id,
            cascade_count = report.cascade_count(),
            deleted_by = %actor.user_id,
            "organization deleted"
        );
        Ok(report)
    }

    /// Parent remote ID for a new organization; none for distributors
    async fn resolve_parent(&self, actor: &Actor, kind: OrgKind, requested: Option<&str>) -> Result<Option<String>, ServiceError> {
        if kind == OrgKind::Distributor {
            return Ok(None);
        }

        let parent = requested
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(actor.org_id.as_str())
            .to_string();

        if parent != actor.org_id {
            authorize(&self.hierarchy, actor, &parent).await?;
        } else if actor.role == Role::Owner {
            // The owner root has no local record
            return Ok(Some(parent));
        }

        let node = self
            .store
            .find_organization_node(&parent)
            .await?
            .ok_or_else(|| ServiceError::invalid_field("parent_id", "not_found", &parent))?;

        let allowed = match kind {
            OrgKind::Reseller => node.kind == OrgKind::Distributor,
            OrgKind::Customer => matches!(node.kind, OrgKind::Distributor | OrgKind::Reseller),
            OrgKind::Distributor => false,
        };
        if !allowed {
            return Err(ServiceError::invalid_field("parent_id", "invalid_parent_kind", &parent));
        }
        Ok(Some(parent))
    }
}

/// Fold a validation failure into `errors`; other failures pass through
fn collect<T>(result: Result<T, ServiceError>, errors: &mut ValidationErrors) -> Result<Option<T>, ServiceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ServiceError::Validation(found)) => {
            errors.errors.extend(found.errors);
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

fn payload(org: &Organization) -> OrganizationPayload {
    OrganizationPayload {
        name: org.name.clone(),
        description: org.description.clone(),
        custom_data: org.attributes.to_custom_data(),
    }
}

/// Duplicate VAT surfaces as a field error instead of a store failure
fn remap_store_error(err: StoreError, org: &Organization) -> ServiceError {
    if err.to_string().to_lowercase().contains("vat already exists") {
        ServiceError::invalid_field("custom_data.vat", "already_exists", org.attributes.vat())
    } else {
        err.into()
    }
}

struct CreateOrgContext {
    org: Organization,
    remote: Option<RemoteOrganization>,
}

impl CreateOrgContext {
    fn remote_id(&self) -> Result<&str, ServiceError> {
        self.remote
            .as_ref()
            .map(|r| r.id.as_str())
            .ok_or_else(|| ServiceError::internal("remote organization not created"))
    }
}

struct CreateRemoteOrganization {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<CreateOrgContext> for CreateRemoteOrganization {
    fn name(&self) -> &'static str {
        "create_remote_organization"
    }

    async fn forward(&self, ctx: &mut CreateOrgContext) -> Result<(), ServiceError> {
        let created = self.idp.create_organization(&payload(&ctx.org)).await?;
        debug!(org_id = %ctx.org.id, remote_id = %created.id, "remote organization created");
        ctx.remote = Some(created);
        Ok(())
    }

    fn compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, ctx: &CreateOrgContext) -> Result<(), ServiceError> {
        let remote_id = ctx.remote_id()?;
        self.idp.delete_organization(remote_id).await?;
        info!(org_id = %ctx.org.id, remote_id, "rolled back remote organization");
        Ok(())
    }
}

struct ConfigureJitRoles {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<CreateOrgContext> for ConfigureJitRoles {
    fn name(&self) -> &'static str {
        "configure_jit_roles"
    }

    async fn forward(&self, ctx: &mut CreateOrgContext) -> Result<(), ServiceError> {
        let role = self.idp.find_organization_role(ctx.org.kind().role_name()).await?;
        self.idp.set_jit_roles(ctx.remote_id()?, &[role.id]).await?;
        Ok(())
    }

    fn required(&self) -> bool {
        false
    }
}

struct PersistOrganization {
    store: Arc<dyn LocalStore>,
}

#[async_trait]
impl SagaStep<CreateOrgContext> for PersistOrganization {
    fn name(&self) -> &'static str {
        "persist_organization"
    }

    async fn forward(&self, ctx: &mut CreateOrgContext) -> Result<(), ServiceError> {
        let remote_id = ctx.remote_id()?.to_string();
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        tx.insert_organization(&ctx.org)
            .await
            .map_err(|e| remap_store_error(e, &ctx.org))?;
        tx.mark_organization_synced(ctx.org.id, &remote_id, now).await?;
        tx.commit().await.map_err(|e| remap_store_error(e, &ctx.org))?;

        ctx.org.remote_id = Some(remote_id);
        ctx.org.synced_at = Some(now);
        Ok(())
    }
}

struct UpdateOrgContext {
    remote_id: String,
    before: Organization,
    after: Organization,
}

struct UpdateRemoteOrganization {
    idp: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl SagaStep<UpdateOrgContext> for UpdateRemoteOrganization {
    fn name(&self) -> &'static str {
        "update_remote_organization"
    }

    async fn forward(&self, ctx: &mut UpdateOrgContext) -> Result<(), ServiceError> {
        self.idp.update_organization(&ctx.remote_id, &payload(&ctx.after)).await?;
        Ok(())
    }

    fn compensable(&self) -> bool {
        true
    }

    async fn compensate(&self, ctx: &UpdateOrgContext) -> Result<(), ServiceError> {
        self.idp.update_organization(&ctx.remote_id, &payload(&ctx.before)).await?;
        info!(remote_id = %ctx.remote_id, "reverted remote organization");
        Ok(())
    }
}

struct PersistOrganizationUpdate {
    store: Arc<dyn LocalStore>,
}

#[async_trait]
impl SagaStep<UpdateOrgContext> for PersistOrganizationUpdate {
    fn name(&self) -> &'static str {
        "persist_organization_update"
    }

    async fn forward(&self, ctx: &mut UpdateOrgContext) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        tx.update_organization(&ctx.after)
            .await
            .map_err(|e| remap_store_error(e, &ctx.after))?;
        tx.commit().await.map_err(|e| remap_store_error(e, &ctx.after))?;
        Ok(())
    }
}
