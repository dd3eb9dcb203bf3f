use std::collections::{HashMap, HashSet};

use crate::database::models::OrgNode;

/// Arena of organization nodes with a parent index.
///
/// Nodes are addressed by remote ID. Parents that are not themselves in the
/// arena (the owner root) still index their children.
#[derive(Debug, Default, Clone)]
pub struct OrgTree {
    nodes: Vec<OrgNode>,
    index: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
}

impl OrgTree {
    pub fn build(nodes: Vec<OrgNode>) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();

        for (slot, node) in nodes.iter().enumerate() {
            index.insert(node.remote_id.clone(), slot);
            if let Some(parent) = &node.parent_id {
                children.entry(parent.clone()).or_default().push(slot);
            }
        }

        Self { nodes, index, children }
    }

    pub fn get(&self, remote_id: &str) -> Option<&OrgNode> {
        self.index.get(remote_id).map(|&slot| &self.nodes[slot])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OrgNode> {
        self.nodes.iter()
    }

    pub fn children<'a>(&'a self, remote_id: &str) -> impl Iterator<Item = &'a OrgNode> + 'a {
        self.children
            .get(remote_id)
            .into_iter()
            .flatten()
            .map(move |&slot| &self.nodes[slot])
    }

    /// Descendants grouped by distance, nearest level first. The root itself is excluded.
    pub fn descendant_levels(&self, remote_id: &str) -> Vec<Vec<&OrgNode>> {
        let mut levels = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([remote_id]);
        let mut frontier: Vec<&str> = vec![remote_id];

        while !frontier.is_empty() {
            let mut level = Vec::new();
            for id in &frontier {
                for child in self.children(id) {
                    if seen.insert(child.remote_id.as_str()) {
                        level.push(child);
                    }
                }
            }
            if level.is_empty() {
                break;
            }
            frontier = level.iter().map(|n| n.remote_id.as_str()).collect();
            levels.push(level);
        }

        levels
    }

    /// Parent chain from `remote_id` upward, nearest first.
    ///
    /// Ends at the first parent missing from the arena, which is still included.
    pub fn ancestor_ids(&self, remote_id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.get(remote_id);

        while let Some(node) = current {
            let Some(parent) = node.parent_id.as_deref() else {
                break;
            };
            if chain.contains(&parent) || chain.len() > self.nodes.len() {
                break;
            }
            chain.push(parent);
            current = self.get(parent);
        }

        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrgKind;
    use uuid::Uuid;

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

    fn sample() -> OrgTree {
        OrgTree::build(vec![
            node("d1", OrgKind::Distributor, None),
            node("r1", OrgKind::Reseller, Some("d1")),
            node("r2", OrgKind::Reseller, Some("d1")),
            node("c1", OrgKind::Customer, Some("r1")),
            node("c2", OrgKind::Customer, Some("d1")),
            node("c3", OrgKind::Customer, Some("owner")),
        ])
    }

    #[test]
    fn levels_are_grouped_by_distance() {
        let tree = sample();
        let levels = tree.descendant_levels("d1");
        assert_eq!(levels.len(), 2);

        let mut first: Vec<&str> = levels[0].iter().map(|n| n.remote_id.as_str()).collect();
        first.sort();
        assert_eq!(first, vec!["c2", "r1", "r2"]);
        assert_eq!(levels[1][0].remote_id, "c1");
    }

    #[test]
    fn children_of_root_outside_arena() {
        let tree = sample();
        let ids: Vec<&str> = tree.children("owner").map(|n| n.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["c3"]);
        assert!(tree.get("owner").is_none());
    }

    #[test]
    fn ancestor_chain_stops_at_root() {
        let tree = sample();
        assert_eq!(tree.ancestor_ids("c1"), vec!["r1", "d1"]);
        assert_eq!(tree.ancestor_ids("c3"), vec!["owner"]);
        assert!(tree.ancestor_ids("d1").is_empty());
    }

    #[test]
    fn cycles_do_not_loop() {
        let tree = OrgTree::build(vec![
            node("a", OrgKind::Reseller, Some("b")),
            node("b", OrgKind::Reseller, Some("a")),
        ]);
        let levels = tree.descendant_levels("a");
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0][0].remote_id, "b");
        assert_eq!(tree.ancestor_ids("a"), vec!["b", "a"]);
    }
}
