use moka::sync::Cache;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::resolver::HierarchyResolver;
use crate::config::HierarchyConfig;
use crate::error::ServiceError;
use crate::types::Role;

/// (generation, role, organization remote ID)
type CacheKey = (u64, Role, String);

/// TTL-memoized resolver with whole-cache invalidation.
///
/// Keys carry the generation observed before the lookup started, so a value
/// computed concurrently with `invalidate_all` lands under a stale generation
/// and is never served afterwards.
pub struct HierarchyCache {
    resolver: HierarchyResolver,
    organizations: Cache<CacheKey, Arc<BTreeSet<String>>>,
    systems: Cache<CacheKey, Arc<BTreeSet<Uuid>>>,
    generation: AtomicU64,
}

impl HierarchyCache {
    pub fn new(resolver: HierarchyResolver, config: &HierarchyConfig) -> Self {
        Self {
            resolver,
            organizations: build_cache(config),
            systems: build_cache(config),
            generation: AtomicU64::new(0),
        }
    }

    pub fn resolver(&self) -> &HierarchyResolver {
        &self.resolver
    }

    fn key(&self, role: Role, org_id: &str) -> CacheKey {
        (self.generation(), role, org_id.to_string())
    }

    pub async fn allowed_organization_ids(&self, role: Role, org_id: &str) -> Result<Arc<BTreeSet<String>>, ServiceError> {
        let key = self.key(role, org_id);
        if let Some(hit) = self.organizations.get(&key) {
            return Ok(hit);
        }

        let value = Arc::new(self.resolver.allowed_organization_ids(role, org_id).await?);
        self.organizations.insert(key, Arc::clone(&value));
        Ok(value)
    }

    pub async fn allowed_system_ids(&self, role: Role, org_id: &str) -> Result<Arc<BTreeSet<Uuid>>, ServiceError> {
        let key = self.key(role, org_id);
        if let Some(hit) = self.systems.get(&key) {
            return Ok(hit);
        }

        let value = Arc::new(self.resolver.allowed_system_ids(role, org_id).await?);
        self.systems.insert(key, Arc::clone(&value));
        Ok(value)
    }

    /// Uncached; parent-pointer lookups are already cheap
    pub async fn is_in_hierarchy(&self, role: Role, org_id: &str, target_id: &str) -> Result<bool, ServiceError> {
        self.resolver.is_in_hierarchy(role, org_id, target_id).await
    }

    pub fn invalidate_all(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.organizations.invalidate_all();
        self.systems.invalidate_all();
        debug!(generation, "hierarchy cache invalidated");
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

fn build_cache<V>(config: &HierarchyConfig) -> Cache<CacheKey, V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(config.cache_max_entries)
        .time_to_live(config.cache_ttl())
        .build()
}
