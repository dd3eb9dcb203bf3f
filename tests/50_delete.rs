mod common;

use anyhow::Result;
use std::time::Duration;

use common::{actor_for, remote, test_config, Fixture};
use orgsync::error::ServiceError;
use orgsync::idp::{IdentityProvider, IdpCall, RemoteError};
use orgsync::services::CreateSystemRequest;
use orgsync::types::OrgKind;

#[tokio::test]
async fn delete_cascades_through_the_subtree() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let other = fx.tree("b").await?;
    let frank = fx.create_user(&actor_for(&tree.reseller), &tree.reseller, "frank@reseller.test").await?;
    let grace = fx.create_user(&actor_for(&tree.customer), &tree.customer, "grace@customer.test").await?;
    fx.services
        .systems
        .create_system(
            &actor_for(&tree.customer),
            CreateSystemRequest {
                name: "edge".into(),
                system_type: "ns8".into(),
                organization_id: None,
            },
        )
        .await?;

    let report = fx
        .services
        .organizations
        .delete_organization(&fx.owner, tree.distributor.id, OrgKind::Distributor)
        .await?;

    assert_eq!(report.organizations, 2);
    assert_eq!(report.users, 2);
    assert_eq!(report.systems, 1);
    assert_eq!(report.cascade_count(), 5);
    assert!(report.failures.is_empty());

    for org in [&tree.distributor, &tree.reseller, &tree.customer] {
        assert!(fx.stored_org(org)?.deleted_at.is_some());
        assert!(fx.idp.organization(remote(org)).is_none());
    }
    for user in [&frank, &grace] {
        assert!(fx.stored_user(user)?.deleted_at.is_some());
        assert!(fx.idp.user(user.remote_id.as_deref().unwrap_or_default()).is_none());
    }
    assert!(fx.store.systems().iter().all(|s| s.deleted_at.is_some()));

    // The unrelated tree survives
    assert_eq!(fx.live_org_count(), 3);
    assert!(fx.idp.organization(remote(&other.customer)).is_some());
    Ok(())
}

#[tokio::test]
async fn delete_guards() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let organizations = &fx.services.organizations;

    let err = organizations
        .delete_organization(&actor_for(&tree.reseller), tree.reseller.id, OrgKind::Reseller)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied(_)));

    let err = organizations
        .delete_organization(&fx.owner, tree.reseller.id, OrgKind::Customer)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = organizations
        .delete_organization(&actor_for(&tree.customer), tree.reseller.id, OrgKind::Reseller)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied(_)));

    organizations
        .delete_organization(&actor_for(&tree.reseller), tree.customer.id, OrgKind::Customer)
        .await?;
    let err = organizations
        .delete_organization(&actor_for(&tree.reseller), tree.customer.id, OrgKind::Customer)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition(_)));
    Ok(())
}

#[tokio::test]
async fn local_delete_happens_before_the_remote_one() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;

    fx.idp.fail(IdpCall::DeleteOrganization, 1, RemoteError::from_status(502, "bad gateway"));
    let err = fx
        .services
        .organizations
        .delete_organization(&fx.owner, tree.customer.id, OrgKind::Customer)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Sync(_)));

    let stored = fx.stored_org(&tree.customer)?;
    assert!(stored.deleted_at.is_some());
    assert!(stored.sync_error.is_some());
    assert!(fx.idp.organization(remote(&tree.customer)).is_some());
    Ok(())
}

#[tokio::test]
async fn missing_remote_counts_as_deleted() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    fx.idp.delete_organization(remote(&tree.customer)).await?;

    fx.services
        .organizations
        .delete_organization(&fx.owner, tree.customer.id, OrgKind::Customer)
        .await?;
    assert!(fx.stored_org(&tree.customer)?.deleted_at.is_some());
    Ok(())
}

#[tokio::test]
async fn a_level_where_every_delete_fails_aborts_the_cascade() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;

    fx.idp.fail(IdpCall::DeleteOrganization, 1, RemoteError::transport("connection refused"));
    let err = fx
        .services
        .organizations
        .delete_organization(&fx.owner, tree.reseller.id, OrgKind::Reseller)
        .await
        .unwrap_err();

    match err {
        ServiceError::BatchFailed { failures, .. } => assert_eq!(failures.len(), 1),
        other => panic!("expected batch failure, got {other:?}"),
    }
    assert!(fx.stored_org(&tree.reseller)?.deleted_at.is_none());
    assert!(fx.idp.organization(remote(&tree.reseller)).is_some());

    let customer = fx.stored_org(&tree.customer)?;
    assert!(customer.deleted_at.is_some());
    assert!(customer.sync_error.is_some());
    Ok(())
}

#[tokio::test]
async fn partial_level_failures_are_reported_and_the_cascade_continues() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    fx.create_org(&actor_for(&tree.reseller), OrgKind::Customer, "Second", "C-second")
        .await?;

    fx.idp.fail(IdpCall::DeleteOrganization, 1, RemoteError::from_status(500, "flaky"));
    let report = fx
        .services
        .organizations
        .delete_organization(&actor_for(&tree.distributor), tree.reseller.id, OrgKind::Reseller)
        .await?;

    assert_eq!(report.organizations, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(fx.stored_org(&tree.reseller)?.deleted_at.is_some());
    assert!(fx.idp.organization(remote(&tree.reseller)).is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn one_deadline_covers_every_level_of_the_cascade() -> Result<()> {
    let mut config = test_config();
    config.cascade.concurrency = 1;
    config.cascade.call_timeout_ms = 800;
    config.cascade.deadline_secs = 1;
    let fx = Fixture::with_config(config);
    let tree = fx.tree("a").await?;
    let second = fx
        .create_org(&actor_for(&tree.reseller), OrgKind::Customer, "Second", "C-second")
        .await?;

    // The first customer fits in the budget, the second runs into the deadline
    fx.idp.set_latency(IdpCall::DeleteOrganization, Duration::from_millis(700));
    let started = tokio::time::Instant::now();
    let err = fx
        .services
        .organizations
        .delete_organization(&fx.owner, tree.distributor.id, OrgKind::Distributor)
        .await
        .unwrap_err();

    match err {
        ServiceError::BatchFailed { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains(remote(&tree.reseller)));
            assert!(failures[0].contains("cascade deadline exceeded"));
        }
        other => panic!("expected batch failure, got {other:?}"),
    }
    assert!(started.elapsed() <= Duration::from_millis(1_050));

    assert_eq!(fx.idp.calls(IdpCall::DeleteOrganization), 2);
    let customers = [fx.stored_org(&tree.customer)?, fx.stored_org(&second)?];
    assert!(customers.iter().all(|c| c.deleted_at.is_some()));
    assert_eq!(customers.iter().filter(|c| c.sync_error.is_some()).count(), 1);
    assert!(fx.stored_org(&tree.reseller)?.deleted_at.is_none());
    assert!(fx.stored_org(&tree.distributor)?.deleted_at.is_none());
    Ok(())
}
