mod common;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;

use common::{actor_for, attrs, remote, test_config, Fixture};
use orgsync::database::models::{OrgAttributes, Organization};
use orgsync::database::{LocalStore, StoreTx};
use orgsync::types::{OrgKind, Role};

/// Write a customer straight into the store, bypassing the services and their invalidation
async fn insert_behind_the_cache(fx: &Fixture, parent: &str, remote_id: &str) -> Result<()> {
    let now = Utc::now();
    let attributes = OrgAttributes::for_create(OrgKind::Customer, Some(parent.to_string()), now, &attrs(json!({ "vat": remote_id })))?;
    let org = Organization::draft("Hidden", "", attributes, now);

    let mut tx = fx.store.begin().await?;
    tx.insert_organization(&org).await?;
    tx.mark_organization_synced(org.id, remote_id, now).await?;
    tx.commit().await?;
    Ok(())
}

#[tokio::test]
async fn reads_are_served_from_cache_until_invalidated() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let hierarchy = &fx.services.hierarchy;
    let r = remote(&tree.reseller);

    let before = hierarchy.allowed_organization_ids(Role::Reseller, r).await?;
    insert_behind_the_cache(&fx, r, "hidden-1").await?;

    let cached = hierarchy.allowed_organization_ids(Role::Reseller, r).await?;
    assert_eq!(cached, before);
    assert!(!cached.contains("hidden-1"));

    hierarchy.invalidate_all();
    let fresh = hierarchy.allowed_organization_ids(Role::Reseller, r).await?;
    assert!(fresh.contains("hidden-1"));
    Ok(())
}

#[tokio::test]
async fn every_mutation_invalidates() -> Result<()> {
    let fx = Fixture::new();
    let hierarchy = &fx.services.hierarchy;

    let start = hierarchy.generation();
    let tree = fx.tree("a").await?;
    assert!(hierarchy.generation() >= start + 3);

    let d = remote(&tree.distributor);
    let seen = hierarchy.allowed_organization_ids(Role::Distributor, d).await?;
    assert_eq!(seen.len(), 3);

    let extra = fx
        .create_org(&actor_for(&tree.distributor), OrgKind::Reseller, "Second", "R-second")
        .await?;
    let seen = hierarchy.allowed_organization_ids(Role::Distributor, d).await?;
    assert!(seen.contains(remote(&extra)));

    let generation = hierarchy.generation();
    fx.services.cascade.suspend(&fx.owner, tree.customer.id).await?;
    assert!(hierarchy.generation() > generation);
    Ok(())
}

#[tokio::test]
async fn entries_expire_after_their_ttl() -> Result<()> {
    let mut config = test_config();
    config.hierarchy.cache_ttl_secs = 1;
    let fx = Fixture::with_config(config);
    let tree = fx.tree("a").await?;
    let hierarchy = &fx.services.hierarchy;
    let r = remote(&tree.reseller);

    hierarchy.allowed_organization_ids(Role::Reseller, r).await?;
    insert_behind_the_cache(&fx, r, "hidden-ttl").await?;
    assert!(!hierarchy.allowed_organization_ids(Role::Reseller, r).await?.contains("hidden-ttl"));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(hierarchy.allowed_organization_ids(Role::Reseller, r).await?.contains("hidden-ttl"));
    Ok(())
}
