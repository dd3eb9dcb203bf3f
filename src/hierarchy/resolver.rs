use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::tree::OrgTree;
use crate::database::models::OrgNode;
use crate::database::LocalStore;
use crate::error::ServiceError;
use crate::types::{OrgKind, Role};

/// Computes reachable organizations and systems for a (role, organization) pair
#[derive(Clone)]
pub struct HierarchyResolver {
    store: Arc<dyn LocalStore>,
}

impl HierarchyResolver {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Tree over every live, synced organization
    pub async fn snapshot(&self) -> Result<OrgTree, ServiceError> {
        let nodes = self.store.list_organization_nodes().await?;
        Ok(OrgTree::build(nodes))
    }

    pub async fn allowed_organization_ids(&self, role: Role, org_id: &str) -> Result<BTreeSet<String>, ServiceError> {
        let tree = self.snapshot().await?;
        let allowed = allowed_in(&tree, role, org_id);
        debug!(role = %role, org_id, count = allowed.len(), "resolved allowed organizations");
        Ok(allowed)
    }

    /// Whether `target_id` is `org_id` or lies below it within the role's reach.
    ///
    /// Walks parent pointers from the target one point lookup at a time.
    pub async fn is_in_hierarchy(&self, role: Role, org_id: &str, target_id: &str) -> Result<bool, ServiceError> {
        if org_id == target_id || role == Role::Owner {
            return Ok(true);
        }

        let mut current = target_id.to_string();
        for _ in 0..role.max_hops() {
            let Some(node) = self.store.find_organization_node(&current).await? else {
                return Ok(false);
            };
            match node.parent_id {
                Some(parent) if parent == org_id => return Ok(true),
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
        Ok(false)
    }

    pub async fn allowed_system_ids(&self, role: Role, org_id: &str) -> Result<BTreeSet<Uuid>, ServiceError> {
        let orgs: Vec<String> = self.allowed_organization_ids(role, org_id).await?.into_iter().collect();
        let ids = self.store.list_system_ids_by_creators(&orgs).await?;
        Ok(ids.into_iter().collect())
    }

    /// Live descendants of `org_id`, nearest level first
    pub async fn subtree(&self, org_id: &str) -> Result<Vec<Vec<OrgNode>>, ServiceError> {
        let tree = self.snapshot().await?;
        Ok(tree
            .descendant_levels(org_id)
            .into_iter()
            .map(|level| level.into_iter().cloned().collect())
            .collect())
    }

    /// Parent chain of `org_id`, nearest first
    pub async fn lineage(&self, org_id: &str) -> Result<Vec<String>, ServiceError> {
        let tree = self.snapshot().await?;
        Ok(tree.ancestor_ids(org_id).into_iter().map(str::to_string).collect())
    }
}

fn allowed_in(tree: &OrgTree, role: Role, org_id: &str) -> BTreeSet<String> {
    let mut allowed = BTreeSet::from([org_id.to_string()]);

    match role {
        Role::Owner => {
            allowed.extend(tree.nodes().map(|n| n.remote_id.clone()));
        }
        Role::Distributor => {
            for child in tree.children(org_id) {
                match child.kind {
                    OrgKind::Reseller => {
                        allowed.insert(child.remote_id.clone());
                        allowed.extend(
                            tree.children(&child.remote_id)
                                .filter(|c| c.kind == OrgKind::Customer)
                                .map(|c| c.remote_id.clone()),
                        );
                    }
                    OrgKind::Customer => {
                        allowed.insert(child.remote_id.clone());
                    }
                    OrgKind::Distributor => {}
                }
            }
        }
        Role::Reseller => {
            allowed.extend(
                tree.children(org_id)
                    .filter(|c| c.kind == OrgKind::Customer)
                    .map(|c| c.remote_id.clone()),
            );
        }
        Role::Customer => {}
    }

    allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: OrgKind, parent: Option<&str>) -> OrgNode {
        OrgNode {
            id: Uuid::new_v4(),
            remote_id: id.to_string(),
            kind,
            parent_id: parent.map(str::to_string),
            active: true,
            suspended_by_org_id: None,
        }
    }

    fn tree() -> OrgTree {
        OrgTree::build(vec![
            node("d1", OrgKind::Distributor, None),
            node("d2", OrgKind::Distributor, None),
            node("r1", OrgKind::Reseller, Some("d1")),
            node("c1", OrgKind::Customer, Some("r1")),
            node("c2", OrgKind::Customer, Some("d1")),
            node("c9", OrgKind::Customer, Some("d2")),
        ])
    }

    fn ids(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn distributor_sees_resellers_and_their_customers() {
        let allowed = allowed_in(&tree(), Role::Distributor, "d1");
        assert_eq!(ids(&allowed), vec!["c1", "c2", "d1", "r1"]);
    }

    #[test]
    fn reseller_sees_own_customers() {
        let allowed = allowed_in(&tree(), Role::Reseller, "r1");
        assert_eq!(ids(&allowed), vec!["c1", "r1"]);
    }

    #[test]
    fn customer_sees_itself() {
        let allowed = allowed_in(&tree(), Role::Customer, "c1");
        assert_eq!(ids(&allowed), vec!["c1"]);
    }

    #[test]
    fn owner_sees_everything_plus_itself() {
        let allowed = allowed_in(&tree(), Role::Owner, "root");
        assert_eq!(allowed.len(), 7);
        assert!(allowed.contains("root"));
        assert!(allowed.contains("c9"));
    }
}
