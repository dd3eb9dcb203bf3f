pub mod cascade;
pub mod fanout;
pub mod saga;
pub mod sync_coordinator;
pub mod system_registry;
pub mod user_sync;

use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::database::models::Organization;
use crate::database::{LocalStore, StoreError};
use crate::error::ServiceError;
use crate::hierarchy::{HierarchyCache, HierarchyResolver};
use crate::idp::IdentityProvider;
use crate::types::Actor;

pub use cascade::{CascadeEngine, CascadeReport, DeleteReport};
pub use fanout::{fan_out, FanoutConfig, FanoutReport};
pub use saga::{Saga, SagaFailure, SagaStep};
pub use sync_coordinator::{CreateOrganizationRequest, SyncCoordinator, UpdateOrganizationRequest};
pub use system_registry::{CreateSystemRequest, RegisteredSystem, SystemRegistry};
pub use user_sync::{CreateUserRequest, UpdateUserRequest, UserSync};

/// Every core service, wired once over the same collaborators
pub struct Services {
    pub organizations: SyncCoordinator,
    pub users: UserSync,
    pub systems: SystemRegistry,
    pub cascade: Arc<CascadeEngine>,
    pub hierarchy: Arc<HierarchyCache>,
}

impl Services {
    pub fn new(store: Arc<dyn LocalStore>, idp: Arc<dyn IdentityProvider>, config: &AppConfig) -> Self {
        let resolver = HierarchyResolver::new(Arc::clone(&store));
        let hierarchy = Arc::new(HierarchyCache::new(resolver, &config.hierarchy));
        let cascade = Arc::new(CascadeEngine::new(
            Arc::clone(&store),
            Arc::clone(&idp),
            Arc::clone(&hierarchy),
            FanoutConfig::from(&config.cascade),
        ));

        Self {
            organizations: SyncCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&idp),
                Arc::clone(&hierarchy),
                Arc::clone(&cascade),
            ),
            users: UserSync::new(Arc::clone(&store), idp, Arc::clone(&hierarchy)),
            systems: SystemRegistry::new(store, Arc::clone(&hierarchy)),
            cascade,
            hierarchy,
        }
    }
}

/// Deny unless `target` is within the actor's reach
pub(crate) async fn authorize(hierarchy: &HierarchyCache, actor: &Actor, target: &str) -> Result<(), ServiceError> {
    if hierarchy.is_in_hierarchy(actor.role, &actor.org_id, target).await? {
        Ok(())
    } else {
        Err(ServiceError::access_denied(format!(
            "organization {} is outside the hierarchy of {}",
            target, actor.org_id
        )))
    }
}

/// Fetch by local ID. Soft-deleted rows are returned; callers decide.
pub(crate) async fn load_organization(store: &dyn LocalStore, id: Uuid) -> Result<Organization, ServiceError> {
    store
        .get_organization(id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("organization {}", id)))
}

pub(crate) fn synced_remote_id(org: &Organization) -> Result<String, ServiceError> {
    org.remote_id
        .clone()
        .ok_or_else(|| ServiceError::not_found(format!("organization {} not synced", org.id)))
}

pub(crate) async fn record_org_sync_error(store: &dyn LocalStore, id: Uuid, message: &str) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    tx.record_organization_sync_error(id, message).await?;
    tx.commit().await
}
