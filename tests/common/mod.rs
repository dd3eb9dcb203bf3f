#![allow(dead_code)]

use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use orgsync::config::AppConfig;
use orgsync::database::models::{Organization, User};
use orgsync::database::MemoryStore;
use orgsync::idp::MemoryIdentityProvider;
use orgsync::services::{CreateOrganizationRequest, CreateUserRequest, Services};
use orgsync::types::{Actor, OrgKind, Role};

pub const OWNER_ORG: &str = "owner-root";

static TRACING: Once = Once::new();

/// Honour RUST_LOG when debugging a failing test
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Services wired over in-memory collaborators that tests can inspect and script
pub struct Fixture {
    pub store: MemoryStore,
    pub idp: MemoryIdentityProvider,
    pub services: Services,
    pub owner: Actor,
}

/// A distributor with one reseller beneath it and one customer beneath that
pub struct Tree {
    pub distributor: Organization,
    pub reseller: Organization,
    pub customer: Organization,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let idp = MemoryIdentityProvider::new();
        let services = Services::new(Arc::new(store.clone()), Arc::new(idp.clone()), &config);

        Self {
            store,
            idp,
            services,
            owner: Actor::new("owner-user", OWNER_ORG, Role::Owner),
        }
    }

    pub async fn create_org(&self, actor: &Actor, kind: OrgKind, name: &str, vat: &str) -> Result<Organization> {
        self.create_org_under(actor, kind, name, vat, None).await
    }

    pub async fn create_org_under(
        &self,
        actor: &Actor,
        kind: OrgKind,
        name: &str,
        vat: &str,
        parent: Option<&str>,
    ) -> Result<Organization> {
        let request = CreateOrganizationRequest {
            name: name.to_string(),
            description: format!("{} test organization", kind),
            custom_data: attrs(json!({ "vat": vat })),
            parent_id: parent.map(str::to_string),
        };
        Ok(self.services.organizations.create_organization(actor, kind, request).await?)
    }

    /// Distributor -> reseller -> customer, each created by its parent
    pub async fn tree(&self, suffix: &str) -> Result<Tree> {
        let distributor = self
            .create_org(&self.owner, OrgKind::Distributor, &format!("Dist {}", suffix), &format!("D-{}", suffix))
            .await?;
        let reseller = self
            .create_org(&actor_for(&distributor), OrgKind::Reseller, &format!("Res {}", suffix), &format!("R-{}", suffix))
            .await?;
        let customer = self
            .create_org(&actor_for(&reseller), OrgKind::Customer, &format!("Cust {}", suffix), &format!("C-{}", suffix))
            .await?;

        Ok(Tree {
            distributor,
            reseller,
            customer,
        })
    }

    pub async fn create_user(&self, actor: &Actor, org: &Organization, email: &str) -> Result<User> {
        let request = CreateUserRequest {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            organization_id: remote(org).to_string(),
            ..CreateUserRequest::default()
        };
        Ok(self.services.users.create_user(actor, request).await?)
    }

    pub fn stored_org(&self, org: &Organization) -> Result<Organization> {
        self.store
            .organizations()
            .into_iter()
            .find(|o| o.id == org.id)
            .context("organization missing from store")
    }

    pub fn stored_user(&self, user: &User) -> Result<User> {
        self.store
            .users()
            .into_iter()
            .find(|u| u.id == user.id)
            .context("user missing from store")
    }

    pub fn live_org_count(&self) -> usize {
        self.store.organizations().iter().filter(|o| o.deleted_at.is_none()).count()
    }
}

/// Small pool and short timeouts so cascade tests stay fast
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.cascade.concurrency = 2;
    config.cascade.call_timeout_ms = 2_000;
    config.cascade.deadline_secs = 10;
    config
}

/// An actor acting from inside `org`
pub fn actor_for(org: &Organization) -> Actor {
    Actor::new(format!("admin-of-{}", org.name), remote(org), Role::from(org.kind()))
}

pub fn remote(org: &Organization) -> &str {
    org.remote_id.as_deref().unwrap_or_default()
}

pub fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
