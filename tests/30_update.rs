mod common;

use anyhow::Result;
use serde_json::json;

use common::{actor_for, attrs, remote, Fixture};
use orgsync::database::FailPoint;
use orgsync::error::ServiceError;
use orgsync::idp::{IdpCall, RemoteError};
use orgsync::services::UpdateOrganizationRequest;
use orgsync::types::OrgKind;

fn rename(name: &str, custom_data: serde_json::Value) -> UpdateOrganizationRequest {
    UpdateOrganizationRequest {
        name: Some(name.to_string()),
        description: None,
        custom_data: attrs(custom_data),
    }
}

#[tokio::test]
async fn update_merges_attributes_and_stamps_the_updater() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;
    let reseller = actor_for(&tree.reseller);

    let updated = fx
        .services
        .organizations
        .update_organization(
            &reseller,
            tree.customer.id,
            OrgKind::Customer,
            rename(
                "Renamed",
                json!({ "vat": "C-new", "city": "Pesaro", "type": "distributor", "createdBy": "someone-else" }),
            ),
        )
        .await?;

    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.kind(), OrgKind::Customer);
    assert_eq!(updated.parent_id(), Some(remote(&tree.reseller)));

    let stored = fx.stored_org(&tree.customer)?;
    assert_eq!(stored.name, "Renamed");
    assert_eq!(stored.attributes.vat(), "C-new");

    let remote_org = fx.idp.organization(remote(&tree.customer)).expect("remote organization");
    assert_eq!(remote_org.name, "Renamed");
    assert_eq!(remote_org.custom_data["type"], "customer");
    assert_eq!(remote_org.custom_data["createdBy"], remote(&tree.reseller));
    assert_eq!(remote_org.custom_data["updatedBy"], remote(&tree.reseller));
    assert_eq!(remote_org.custom_data["city"], "Pesaro");
    assert!(remote_org.custom_data.contains_key("updatedAt"));
    Ok(())
}

#[tokio::test]
async fn local_failure_reverts_the_remote_update() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;

    fx.store.inject_failure(FailPoint::UpdateOrganization, 1);
    let result = fx
        .services
        .organizations
        .update_organization(&fx.owner, tree.reseller.id, OrgKind::Reseller, rename("Lost", json!({})))
        .await;

    assert!(result.is_err());
    assert_eq!(fx.idp.calls(IdpCall::UpdateOrganization), 2);
    assert_eq!(fx.idp.organization(remote(&tree.reseller)).expect("remote").name, "Res a");
    assert_eq!(fx.stored_org(&tree.reseller)?.name, "Res a");
    Ok(())
}

#[tokio::test]
async fn remote_failure_leaves_local_untouched() -> Result<()> {
    let fx = Fixture::new();
    let tree = fx.tree("a").await?;

    fx.idp.fail(IdpCall::UpdateOrganization, 1, RemoteError::from_status(500, "boom"));
    let err = fx
        .services
        .organizations
        .update_organization(&fx.owner, tree.reseller.id, OrgKind::Reseller, rename("Never", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Sync(_)));
    assert_eq!(fx.stored_org(&tree.reseller)?.name, "Res a");
    Ok(())
}

#[tokio::test]
async fn update_is_scoped_by_kind_and_reach() -> Result<()> {
    let fx = Fixture::new();
    let a = fx.tree("a").await?;
    let b = fx.tree("b").await?;
    let organizations = &fx.services.organizations;

    let err = organizations
        .update_organization(&fx.owner, a.customer.id, OrgKind::Reseller, rename("X", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = organizations
        .update_organization(&actor_for(&b.reseller), a.customer.id, OrgKind::Customer, rename("X", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied(_)));

    let err = organizations
        .update_organization(&fx.owner, a.customer.id, OrgKind::Customer, rename("X", json!({ "type": "Owner" })))
        .await
        .unwrap_err();
    let ServiceError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert_eq!(errors.field("custom_data.type").map(|e| e.message.as_str()), Some("reserved_value"));

    assert_eq!(fx.idp.calls(IdpCall::UpdateOrganization), 0);
    Ok(())
}
