mod common;

use anyhow::Result;
use serde_json::json;

use common::{actor_for, attrs, remote, Fixture, OWNER_ORG};
use orgsync::database::FailPoint;
use orgsync::error::ServiceError;
use orgsync::idp::{IdpCall, RemoteError};
use orgsync::services::CreateOrganizationRequest;
use orgsync::types::OrgKind;

fn request(name: &str, custom_data: serde_json::Value) -> CreateOrganizationRequest {
    CreateOrganizationRequest {
        name: name.to_string(),
        description: String::new(),
        custom_data: attrs(custom_data),
        parent_id: None,
    }
}

#[tokio::test]
async fn create_writes_remote_then_local() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;

    let stored = fx.stored_org(&tree.customer)?;
    assert!(stored.synced_at.is_some());
    assert_eq!(stored.remote_id, tree.customer.remote_id);
    assert_eq!(stored.parent_id(), Some(remote(&tree.reseller)));

    let remote_org = fx.idp.organization(remote(&tree.customer)).expect("remote organization");
    assert_eq!(remote_org.name, "Cust a");
    assert_eq!(remote_org.custom_data["type"], "customer");
    assert_eq!(remote_org.custom_data["createdBy"], remote(&tree.reseller));
    assert_eq!(remote_org.custom_data["vat"], "C-a");

    assert_eq!(fx.idp.jit_roles(remote(&tree.customer)), vec!["role-customer".to_string()]);
    assert_eq!(fx.idp.jit_roles(remote(&tree.distributor)), vec!["role-distributor".to_string()]);
    Ok(())
}

#[tokio::test]
async fn owner_places_children_at_the_root_or_under_a_parent() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    assert_eq!(tree.distributor.parent_id(), None);

    let at_root = fx.create_org(&fx.owner, OrgKind::Customer, "Root customer", "C-root").await?;
    assert_eq!(at_root.parent_id(), Some(OWNER_ORG));

    let placed = fx
        .create_org_under(&fx.owner, OrgKind::Customer, "Placed", "C-placed", Some(remote(&tree.reseller)))
        .await?;
    assert_eq!(placed.parent_id(), Some(remote(&tree.reseller)));
    Ok(())
}

#[tokio::test]
async fn local_failure_rolls_back_the_remote_organization() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let remote_before = fx.idp.organization_count();
    let local_before = fx.store.organizations().len();

    fx.store.inject_failure(FailPoint::InsertOrganization, 1);
    let result = fx
        .create_org(&actor_for(&tree.reseller), OrgKind::Customer, "Doomed", "C-doomed")
        .await;

    assert!(result.is_err());
    assert_eq!(fx.idp.calls(IdpCall::CreateOrganization), 4);
    assert_eq!(fx.idp.calls(IdpCall::DeleteOrganization), 1);
    assert_eq!(fx.idp.organization_count(), remote_before);
    assert_eq!(fx.store.organizations().len(), local_before);
    Ok(())
}

#[tokio::test]
async fn duplicate_vat_is_a_field_error_and_leaves_no_remote_orphan() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let reseller = actor_for(&tree.reseller);
    let remote_before = fx.idp.organization_count();

    let err = fx
        .services
        .organizations
        .create_organization(&reseller, OrgKind::Customer, request("Twin", json!({ "vat": "C-a" })))
        .await
        .unwrap_err();

    match err {
        ServiceError::Validation(errors) => {
            let field = errors.field("custom_data.vat").expect("vat error");
            assert_eq!(field.message, "already_exists");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(fx.idp.organization_count(), remote_before);

    // Same VAT on another kind is accepted
    fx.create_org(&actor_for(&tree.distributor), OrgKind::Reseller, "Other kind", "C-a")
        .await?;
    Ok(())
}

#[tokio::test]
async fn validation_runs_before_any_remote_call() -> Result<()> {
    let fx = Fixture::new();

    let err = fx
        .services
        .organizations
        .create_organization(&fx.owner, OrgKind::Distributor, request("  ", json!({ "type": "owner" })))
        .await
        .unwrap_err();

    let ServiceError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert_eq!(errors.field("name").map(|e| e.message.as_str()), Some("cannot_be_empty"));
    assert_eq!(errors.field("custom_data.vat").map(|e| e.message.as_str()), Some("required"));
    assert_eq!(errors.field("custom_data.type").map(|e| e.message.as_str()), Some("reserved_value"));
    assert_eq!(fx.idp.calls(IdpCall::CreateOrganization), 0);
    Ok(())
}

#[tokio::test]
async fn parent_must_exist_and_be_of_a_compatible_kind() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;

    let err = fx
        .create_org_under(&fx.owner, OrgKind::Reseller, "Misplaced", "R-x", Some(remote(&tree.customer)))
        .await
        .unwrap_err();
    match err.downcast_ref::<ServiceError>() {
        Some(ServiceError::Validation(errors)) => {
            assert_eq!(errors.field("parent_id").map(|e| e.message.as_str()), Some("invalid_parent_kind"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let err = fx
        .create_org_under(&fx.owner, OrgKind::Customer, "Orphan", "C-x", Some("missing-parent"))
        .await
        .unwrap_err();
    match err.downcast_ref::<ServiceError>() {
        Some(ServiceError::Validation(errors)) => {
            assert_eq!(errors.field("parent_id").map(|e| e.message.as_str()), Some("not_found"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn remote_rejections_are_classified() -> Result<()> {
    let fx = Fixture::new();

    fx.idp.fail(
        IdpCall::CreateOrganization,
        1,
        RemoteError::from_status(422, r#"{"code":"guard.invalid_input","message":"Bad name"}"#),
    );
    let err = fx
        .services
        .organizations
        .create_organization(&fx.owner, OrgKind::Distributor, request("Bad", json!({ "vat": "D-1" })))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    fx.idp.fail(IdpCall::CreateOrganization, 1, RemoteError::from_status(503, "unavailable"));
    let err = fx
        .services
        .organizations
        .create_organization(&fx.owner, OrgKind::Distributor, request("Down", json!({ "vat": "D-2" })))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Sync(_)));

    assert!(fx.store.organizations().is_empty());
    assert_eq!(fx.idp.organization_count(), 0);
    Ok(())
}

#[tokio::test]
async fn jit_role_failure_does_not_abort_creation() -> Result<()> {
    let fx = Fixture::new();
    fx.idp.fail(IdpCall::SetJitRoles, 1, RemoteError::transport("connection reset"));

    let org = fx.create_org(&fx.owner, OrgKind::Distributor, "No JIT", "D-jit").await?;

    assert!(fx.stored_org(&org)?.synced_at.is_some());
    assert!(fx.idp.organization(remote(&org)).is_some());
    assert!(fx.idp.jit_roles(remote(&org)).is_empty());
    Ok(())
}
