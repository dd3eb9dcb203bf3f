mod common;

use anyhow::Result;
use std::collections::BTreeSet;

use common::{actor_for, remote, Fixture, OWNER_ORG};
use orgsync::error::ServiceError;
use orgsync::services::CreateSystemRequest;
use orgsync::types::{OrgKind, Role};

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn allowed_sets_follow_role_depth() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let (d, r, c) = (remote(&tree.distributor), remote(&tree.reseller), remote(&tree.customer));
    let hierarchy = &fx.services.hierarchy;

    let owner = hierarchy.allowed_organization_ids(Role::Owner, OWNER_ORG).await?;
    assert_eq!(*owner, set(&[OWNER_ORG, d, r, c]));

    let distributor = hierarchy.allowed_organization_ids(Role::Distributor, d).await?;
    assert_eq!(*distributor, set(&[d, r, c]));

    let reseller = hierarchy.allowed_organization_ids(Role::Reseller, r).await?;
    assert_eq!(*reseller, set(&[r, c]));

    let customer = hierarchy.allowed_organization_ids(Role::Customer, c).await?;
    assert_eq!(*customer, set(&[c]));
    Ok(())
}

#[tokio::test]
async fn distributor_sees_its_direct_customers() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let direct = fx
        .create_org(&actor_for(&tree.distributor), OrgKind::Customer, "Direct", "C-direct")
        .await?;

    let allowed = fx
        .services
        .hierarchy
        .allowed_organization_ids(Role::Distributor, remote(&tree.distributor))
        .await?;
    assert!(allowed.contains(remote(&direct)));

    // The reseller does not see its sibling's customer
    let reseller = fx
        .services
        .hierarchy
        .allowed_organization_ids(Role::Reseller, remote(&tree.reseller))
        .await?;
    assert!(!reseller.contains(remote(&direct)));
    Ok(())
}

#[tokio::test]
async fn separate_trees_do_not_overlap() -> Result<()> {
    let fx = Fixture::new();
    let a = fx.tree("a").await?;
    let b = fx.tree("b").await?;
    let hierarchy = &fx.services.hierarchy;

    let d = remote(&a.distributor);
    assert!(hierarchy.is_in_hierarchy(Role::Distributor, d, remote(&a.customer)).await?);
    assert!(!hierarchy.is_in_hierarchy(Role::Distributor, d, remote(&b.customer)).await?);
    assert!(!hierarchy.is_in_hierarchy(Role::Distributor, d, remote(&b.distributor)).await?);
    assert!(!hierarchy.is_in_hierarchy(Role::Reseller, remote(&a.reseller), remote(&a.distributor)).await?);
    assert!(!hierarchy.is_in_hierarchy(Role::Customer, remote(&a.customer), remote(&a.reseller)).await?);

    // Reflexive for everyone, universal for the owner
    assert!(hierarchy.is_in_hierarchy(Role::Customer, remote(&a.customer), remote(&a.customer)).await?);
    assert!(hierarchy.is_in_hierarchy(Role::Owner, OWNER_ORG, remote(&b.customer)).await?);
    Ok(())
}

#[tokio::test]
async fn lineage_walks_to_the_distributor() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;

    let lineage = fx.services.hierarchy.resolver().lineage(remote(&tree.customer)).await?;
    assert_eq!(
        lineage,
        vec![remote(&tree.reseller).to_string(), remote(&tree.distributor).to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn systems_follow_their_creator() -> Result<()> {
    let fx = Fixture::new();
    let a = fx.tree("a").await?;
    let b = fx.tree("b").await?;

    let registered = fx
        .services
        .systems
        .create_system(
            &actor_for(&a.customer),
            CreateSystemRequest {
                name: "edge-1".into(),
                system_type: "ns8".into(),
                organization_id: None,
            },
        )
        .await?;
    let id = registered.system.id;
    assert_eq!(registered.system.creator_org_id, remote(&a.customer));

    let hierarchy = &fx.services.hierarchy;
    assert!(hierarchy.allowed_system_ids(Role::Distributor, remote(&a.distributor)).await?.contains(&id));
    assert!(hierarchy.allowed_system_ids(Role::Customer, remote(&a.customer)).await?.contains(&id));
    assert!(!hierarchy.allowed_system_ids(Role::Distributor, remote(&b.distributor)).await?.contains(&id));
    assert!(hierarchy.allowed_system_ids(Role::Owner, OWNER_ORG).await?.contains(&id));
    Ok(())
}

#[tokio::test]
async fn creation_outside_reach_is_denied() -> Result<()> {
    let fx = Fixture::new();
    let a = fx.tree("a").await?;
    let b = fx.tree("b").await?;

    let err = fx
        .create_org_under(&actor_for(&a.reseller), OrgKind::Customer, "Stray", "C-stray", Some(remote(&b.reseller)))
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ServiceError>(), Some(ServiceError::AccessDenied(_))));

    let err = fx
        .create_org(&actor_for(&a.reseller), OrgKind::Reseller, "Peer", "R-peer")
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ServiceError>(), Some(ServiceError::AccessDenied(_))));

    let err = fx
        .create_org(&actor_for(&a.customer), OrgKind::Customer, "Child", "C-child")
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ServiceError>(), Some(ServiceError::AccessDenied(_))));
    Ok(())
}
