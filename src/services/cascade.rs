use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::fanout::{fan_out, FanoutConfig, FanoutReport, DEADLINE_EXCEEDED};
use super::{authorize, load_organization, record_org_sync_error, synced_remote_id};
use crate::database::models::{OrgNode, Organization, User};
use crate::database::{LocalStore, StoreError};
use crate::error::ServiceError;
use crate::hierarchy::HierarchyCache;
use crate::idp::IdentityProvider;
use crate::types::{Actor, Transition};

/// Counts from a suspend or reactivate cascade
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CascadeReport {
    pub organizations: u64,
    pub users: usize,
    pub systems: u64,
    pub remote_failures: Vec<String>,
}

/// Dependents removed while deleting an organization
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteReport {
    pub organizations: usize,
    pub users: usize,
    pub systems: u64,
    pub failures: Vec<String>,
}

impl DeleteReport {
    pub fn cascade_count(&self) -> usize {
        self.organizations + self.users + self.systems as usize
    }
}

/// A user whose remote state follows a cascade
#[derive(Debug, Clone)]
struct RemoteUserRef {
    id: Uuid,
    remote_id: String,
}

impl std::fmt::Display for RemoteUserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user {}", self.id)
    }
}

fn remote_refs(users: &[User]) -> Vec<RemoteUserRef> {
    users
        .iter()
        .filter_map(|u| {
            u.remote_id.as_ref().map(|remote_id| RemoteUserRef {
                id: u.id,
                remote_id: remote_id.clone(),
            })
        })
        .collect()
}

/// Suspend, reactivate and delete propagation across an organization subtree
pub struct CascadeEngine {
    store: Arc<dyn LocalStore>,
    idp: Arc<dyn IdentityProvider>,
    hierarchy: Arc<HierarchyCache>,
    fanout: FanoutConfig,
}

impl CascadeEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        idp: Arc<dyn IdentityProvider>,
        hierarchy: Arc<HierarchyCache>,
        fanout: FanoutConfig,
    ) -> Self {
        Self { store, idp, hierarchy, fanout }
    }

    /// Suspend an active organization and everything active beneath it
    pub async fn suspend(&self, actor: &Actor, id: Uuid) -> Result<CascadeReport, ServiceError> {
        let org = load_organization(self.store.as_ref(), id).await?;
        let remote_id = self.guard(actor, &org, Transition::Suspend).await?;
        let deadline = self.fanout.deadline_from_now();

        let levels = self.hierarchy.resolver().subtree(&remote_id).await?;
        let subtree = subtree_ids(&remote_id, &levels);
        let now = Utc::now();

        // (a) Local state in one transaction, one statement per level
        let mut tx = self.store.begin().await?;
        tx.suspend_organization(org.id, now).await?;
        let mut organizations = 1;
        for level in &levels {
            let ids: Vec<String> = level.iter().map(|n| n.remote_id.clone()).collect();
            organizations += tx.suspend_organizations(&ids, &remote_id, now).await?;
        }
        let users = tx.suspend_users(&subtree, &remote_id, now).await?;
        let systems = tx.suspend_systems(&subtree, &remote_id, now).await?;
        tx.commit().await?;
        self.hierarchy.invalidate_all();

        // (b) Remote user state, best-effort
        let idp = &self.idp;
        let remote = fan_out(remote_refs(&users), &self.fanout, deadline, |user| async move {
            idp.suspend_user(&user.remote_id).await
        })
        .await;
        let remote_failures = self.record_user_failures(&remote).await;

        info!(
            org_id = %org.id,
            remote_id = %remote_id,
            organizations,
            users = users.len(),
            systems,
            remote_failures = remote_failures.len(),
            "organization suspended"
        );

        Ok(CascadeReport {
            organizations,
            users: users.len(),
            systems,
            remote_failures,
        })
    }

    /// Reactivate an independently suspended organization and exactly the
    /// entities its own cascade suspended
    pub async fn reactivate(&self, actor: &Actor, id: Uuid) -> Result<CascadeReport, ServiceError> {
        let org = load_organization(self.store.as_ref(), id).await?;
        let remote_id = self.guard(actor, &org, Transition::Reactivate).await?;

        if let Some(by) = &org.suspended_by_org_id {
            return Err(ServiceError::InvalidTransition(format!(
                "organization {} was suspended by organization {}; reactivate that one instead",
                org.id, by
            )));
        }
        let deadline = self.fanout.deadline_from_now();

        let mut tx = self.store.begin().await?;
        tx.reactivate_organization(org.id).await?;
        let organizations = 1 + tx.reactivate_organizations_suspended_by(&remote_id).await?;
        let users = tx.reactivate_users_suspended_by(&remote_id).await?;
        let systems = tx.reactivate_systems_suspended_by(&remote_id).await?;
        tx.commit().await?;
        self.hierarchy.invalidate_all();

        let idp = &self.idp;
        let remote = fan_out(remote_refs(&users), &self.fanout, deadline, |user| async move {
            idp.reactivate_user(&user.remote_id).await
        })
        .await;
        let remote_failures = self.record_user_failures(&remote).await;

        info!(
            org_id = %org.id,
            remote_id = %remote_id,
            organizations,
            users = users.len(),
            systems,
            remote_failures = remote_failures.len(),
            "organization reactivated"
        );

        Ok(CascadeReport {
            organizations,
            users: users.len(),
            systems,
            remote_failures,
        })
    }

    /// Remove everything below `org`: descendants deepest first, then users,
    /// then systems. The organization itself is left to the caller.
    ///
    /// All remote batches share one deadline taken when the cascade starts.
    pub async fn delete_dependents(&self, org: &Organization) -> Result<DeleteReport, ServiceError> {
        let deadline = self.fanout.deadline_from_now();
        let mut report = DeleteReport::default();
        let Some(remote_id) = org.remote_id.clone() else {
            return Ok(report);
        };

        let levels = self.hierarchy.resolver().subtree(&remote_id).await?;
        let subtree = subtree_ids(&remote_id, &levels);

        // (a) Descendant organizations, local soft delete before remote delete
        for level in levels.into_iter().rev() {
            let outcome = fan_out(level, &self.fanout, deadline, |node| self.delete_descendant(node)).await;
            // Keep the remote failure on every row that was touched
            for (node, err) in outcome.failed.iter().filter(|(_, err)| err != DEADLINE_EXCEEDED) {
                self.note_org_sync_error(node.id, err).await;
            }
            let failures: Vec<String> = outcome
                .failed
                .iter()
                .map(|(node, err)| format!("organization {}: {}", node.remote_id, err))
                .collect();

            if outcome.all_failed() {
                return Err(ServiceError::BatchFailed {
                    operation: format!("delete descendants of organization {}", org.id),
                    failures,
                });
            }
            for failure in &failures {
                warn!(parent = %remote_id, failure = %failure, "descendant delete failed");
            }
            report.organizations += outcome.succeeded.len();
            report.failures.extend(failures);
        }

        // (b) Users of the whole subtree, one remote call each
        let users = self.store.list_users_by_organizations(&subtree).await?;
        let outcome = fan_out(users, &self.fanout, deadline, |user| self.delete_member(user)).await;
        if outcome.all_failed() {
            warn!(parent = %remote_id, count = outcome.failed.len(), "every user delete failed, continuing");
        }
        report.users = outcome.succeeded.len();
        report
            .failures
            .extend(outcome.failed.iter().map(|(u, err)| format!("user {}: {}", u.id, err)));

        // (c) Systems in one set-based statement
        let mut tx = self.store.begin().await?;
        report.systems = tx.soft_delete_systems_by_creators(&subtree, Utc::now()).await?;
        tx.commit().await?;

        Ok(report)
    }

    async fn delete_descendant(&self, node: OrgNode) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        tx.soft_delete_organization(node.id, Utc::now()).await?;
        tx.commit().await?;

        match self.idp.delete_organization(&node.remote_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(ServiceError::Sync(err)),
        }
    }

    async fn delete_member(&self, user: User) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        tx.soft_delete_user(user.id, Utc::now()).await?;
        tx.commit().await?;

        let Some(remote_id) = &user.remote_id else {
            return Ok(());
        };
        match self.idp.delete_user(remote_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(ServiceError::Sync(err)),
        }
    }

    /// Common preconditions: synced, not the caller's own org, in reach, valid transition
    async fn guard(&self, actor: &Actor, org: &Organization, transition: Transition) -> Result<String, ServiceError> {
        org.state().apply(transition)?;
        let remote_id = synced_remote_id(org)?;
        if remote_id == actor.org_id {
            return Err(ServiceError::access_denied(format!(
                "cannot {:?} your own organization",
                transition
            )));
        }
        authorize(&self.hierarchy, actor, &remote_id).await?;
        Ok(remote_id)
    }

    async fn record_user_failures(&self, outcome: &FanoutReport<RemoteUserRef>) -> Vec<String> {
        if outcome.failed.is_empty() {
            return Vec::new();
        }

        for (user, err) in &outcome.failed {
            warn!(user_id = %user.id, remote_id = %user.remote_id, error = %err, "remote user state sync failed");
        }

        if let Err(err) = self.store_user_sync_errors(&outcome.failed).await {
            warn!(error = %err, "failed to record user sync errors");
        }

        outcome.failure_messages()
    }

    async fn store_user_sync_errors(&self, failed: &[(RemoteUserRef, String)]) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;
        for (user, err) in failed {
            tx.record_user_sync_error(user.id, err).await?;
        }
        tx.commit().await
    }

    async fn note_org_sync_error(&self, id: Uuid, message: &str) {
        if let Err(err) = record_org_sync_error(self.store.as_ref(), id, message).await {
            warn!(org_id = %id, error = %err, "failed to record organization sync error");
        }
    }
}

fn subtree_ids(root: &str, levels: &[Vec<OrgNode>]) -> Vec<String> {
    std::iter::once(root.to_string())
        .chain(levels.iter().flatten().map(|n| n.remote_id.clone()))
        .collect()
}
