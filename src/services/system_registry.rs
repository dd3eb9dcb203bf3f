use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::authorize;
use crate::database::models::System;
use crate::database::LocalStore;
use crate::error::{ServiceError, ValidationErrors};
use crate::hierarchy::HierarchyCache;
use crate::types::Actor;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSystemRequest {
    pub name: String,
    pub system_type: String,
    /// Remote ID of the owning organization; defaults to the actor's
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// A newly registered system and its one-time plaintext secret
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredSystem {
    pub system: System,
    pub secret: String,
}

/// Local-only registry of provisioned systems
pub struct SystemRegistry {
    store: Arc<dyn LocalStore>,
    hierarchy: Arc<HierarchyCache>,
}

impl SystemRegistry {
    pub fn new(store: Arc<dyn LocalStore>, hierarchy: Arc<HierarchyCache>) -> Self {
        Self { store, hierarchy }
    }

    pub async fn create_system(&self, actor: &Actor, request: CreateSystemRequest) -> Result<RegisteredSystem, ServiceError> {
        let mut errors = ValidationErrors::new();
        if request.name.trim().is_empty() {
            errors.push("name", "cannot_be_empty", request.name.as_str());
        }
        if request.system_type.trim().is_empty() {
            errors.push("system_type", "cannot_be_empty", request.system_type.as_str());
        }
        errors.into_result()?;

        let creator = request
            .organization_id
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(actor.org_id.as_str())
            .to_string();
        authorize(&self.hierarchy, actor, &creator).await?;

        let secret = generate_secret();
        let now = Utc::now();
        let system = System {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            system_type: request.system_type.trim().to_string(),
            creator_org_id: creator,
            secret_hash: hash_secret(&secret),
            suspended_at: None,
            suspended_by_org_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_system(&system).await?;
        tx.commit().await?;
        self.hierarchy.invalidate_all();

        info!(system_id = %system.id, creator = %system.creator_org_id, created_by = %actor.user_id, "system registered");
        Ok(RegisteredSystem { system, secret })
    }

    pub async fn delete_system(&self, actor: &Actor, id: Uuid) -> Result<(), ServiceError> {
        let system = self
            .store
            .get_system(id)
            .await?
            .filter(|s| s.deleted_at.is_none())
            .ok_or_else(|| ServiceError::not_found(format!("system {}", id)))?;
        authorize(&self.hierarchy, actor, &system.creator_org_id).await?;

        let mut tx = self.store.begin().await?;
        tx.soft_delete_system(id, Utc::now()).await?;
        tx.commit().await?;
        self.hierarchy.invalidate_all();

        info!(system_id = %id, deleted_by = %actor.user_id, "system deleted");
        Ok(())
    }
}

fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Hex-encoded SHA-256 of a system secret
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
