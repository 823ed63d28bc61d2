//! Single-root superior/subordinate tree used for organization-chart routing.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::domain::{OrgNodeId, UserId};

/// Traversals stop descending past this many levels below the starting node.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgNode {
    pub id: OrgNodeId,
    pub user_id: UserId,
    #[serde(default)]
    pub superior_id: Option<OrgNodeId>,
}

/// Nested view of a node and everything reporting to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgTreeNode {
    pub id: OrgNodeId,
    pub user_id: UserId,
    pub subordinates: Vec<OrgTreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("organization chart already has a root node")]
    SecondRoot,
    #[error("superior node {0} does not exist")]
    UnknownSuperior(OrgNodeId),
    #[error("node {0} already exists")]
    DuplicateNode(OrgNodeId),
    #[error("user {0} already has a node in the organization chart")]
    DuplicateUser(UserId),
    #[error("node {0} not found")]
    NodeNotFound(OrgNodeId),
    #[error("root node {0} cannot be moved under another node")]
    RootImmovable(OrgNodeId),
    #[error("node {0} still has subordinates")]
    HasSubordinates(OrgNodeId),
    #[error("assigning {superior} above {node} would create a cycle")]
    CycleDetected { node: OrgNodeId, superior: OrgNodeId },
    #[error("organization chart deeper than {} levels", MAX_DEPTH)]
    DepthExceeded,
}

/// Node arena plus a children index; every mutation keeps both in step.
#[derive(Debug, Clone, Default)]
pub struct OrgHierarchy {
    nodes: HashMap<OrgNodeId, OrgNode>,
    by_user: HashMap<UserId, OrgNodeId>,
    children: BTreeMap<OrgNodeId, BTreeSet<OrgNodeId>>,
    root: Option<OrgNodeId>,
}

impl OrgHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted rows. Superiors may appear after their subordinates.
    pub fn from_nodes(nodes: Vec<OrgNode>) -> Result<Self, HierarchyError> {
        let mut hierarchy = Self::new();
        let mut pending: VecDeque<OrgNode> = nodes.into();
        let mut stalled = 0;

        while let Some(node) = pending.pop_front() {
            match hierarchy.insert(node.clone()) {
                Ok(()) => stalled = 0,
                Err(HierarchyError::UnknownSuperior(missing)) => {
                    stalled += 1;
                    if stalled > pending.len() {
                        return Err(HierarchyError::UnknownSuperior(missing));
                    }
                    pending.push_back(node);
                }
                Err(other) => return Err(other),
            }
        }

        Ok(hierarchy)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&OrgNode> {
        self.root.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn node(&self, id: &OrgNodeId) -> Option<&OrgNode> {
        self.nodes.get(id)
    }

    pub fn node_for_user(&self, user_id: &UserId) -> Option<&OrgNode> {
        self.by_user.get(user_id).and_then(|id| self.nodes.get(id))
    }

    /// Rows in id order, suitable for persistence.
    pub fn nodes(&self) -> Vec<OrgNode> {
        let mut nodes: Vec<OrgNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn insert(&mut self, node: OrgNode) -> Result<(), HierarchyError> {
        if self.nodes.contains_key(&node.id) {
            return Err(HierarchyError::DuplicateNode(node.id));
        }
        if self.by_user.contains_key(&node.user_id) {
            return Err(HierarchyError::DuplicateUser(node.user_id));
        }

        match &node.superior_id {
            None if self.root.is_some() => return Err(HierarchyError::SecondRoot),
            None => self.root = Some(node.id.clone()),
            Some(superior) if !self.nodes.contains_key(superior) => {
                return Err(HierarchyError::UnknownSuperior(superior.clone()))
            }
            Some(superior) => {
                self.children
                    .entry(superior.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
        }

        self.by_user.insert(node.user_id.clone(), node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Removes a leaf. Nodes with subordinates must be emptied or reassigned first.
    pub fn remove(&mut self, id: &OrgNodeId) -> Result<OrgNode, HierarchyError> {
        if !self.nodes.contains_key(id) {
            return Err(HierarchyError::NodeNotFound(id.clone()));
        }
        if self.children.get(id).is_some_and(|set| !set.is_empty()) {
            return Err(HierarchyError::HasSubordinates(id.clone()));
        }

        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| HierarchyError::NodeNotFound(id.clone()))?;
        self.by_user.remove(&node.user_id);
        self.children.remove(id);
        match &node.superior_id {
            Some(superior) => {
                if let Some(siblings) = self.children.get_mut(superior) {
                    siblings.remove(id);
                }
            }
            None => self.root = None,
        }
        Ok(node)
    }

    /// Move `id` under `superior`. The root cannot be moved.
    pub fn reassign(&mut self, id: &OrgNodeId, superior: &OrgNodeId) -> Result<(), HierarchyError> {
        let current = self
            .nodes
            .get(id)
            .ok_or_else(|| HierarchyError::NodeNotFound(id.clone()))?
            .superior_id
            .clone();
        if !self.nodes.contains_key(superior) {
            return Err(HierarchyError::UnknownSuperior(superior.clone()));
        }
        let Some(current) = current else {
            return Err(HierarchyError::RootImmovable(id.clone()));
        };

        if superior == id || self.subtree_ids(id)?.contains(superior) {
            return Err(HierarchyError::CycleDetected {
                node: id.clone(),
                superior: superior.clone(),
            });
        }

        if let Some(siblings) = self.children.get_mut(&current) {
            siblings.remove(id);
        }
        self.children
            .entry(superior.clone())
            .or_default()
            .insert(id.clone());
        if let Some(node) = self.nodes.get_mut(id) {
            node.superior_id = Some(superior.clone());
        }
        Ok(())
    }

    /// Direct superior of the user's node; `None` for the root or unknown users.
    pub fn superior_of(&self, user_id: &UserId) -> Option<&OrgNode> {
        self.node_for_user(user_id)
            .and_then(|node| node.superior_id.as_ref())
            .and_then(|superior| self.nodes.get(superior))
    }

    /// True only when `superior` is exactly one hop above `subordinate`.
    pub fn reports_to(&self, subordinate: &UserId, superior: &UserId) -> bool {
        match (self.node_for_user(subordinate), self.node_for_user(superior)) {
            (Some(sub), Some(sup)) => sub.superior_id.as_ref() == Some(&sup.id),
            _ => false,
        }
    }

    /// Breadth-first listing of every node below `id` (excluding `id`).
    pub fn subordinates(&self, id: &OrgNodeId) -> Result<Vec<&OrgNode>, HierarchyError> {
        Ok(self
            .subtree_ids(id)?
            .into_iter()
            .filter(|candidate| candidate != id)
            .filter_map(|candidate| self.nodes.get(&candidate))
            .collect())
    }

    fn subtree_ids(&self, id: &OrgNodeId) -> Result<Vec<OrgNodeId>, HierarchyError> {
        if !self.nodes.contains_key(id) {
            return Err(HierarchyError::NodeNotFound(id.clone()));
        }

        let mut visited = BTreeSet::new();
        let mut ordered = Vec::new();
        let mut queue = VecDeque::from([(id.clone(), 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if depth > MAX_DEPTH {
                return Err(HierarchyError::DepthExceeded);
            }
            if let Some(children) = self.children.get(&current) {
                for child in children {
                    queue.push_back((child.clone(), depth + 1));
                }
            }
            ordered.push(current);
        }

        Ok(ordered)
    }

    /// Nested tree rooted at `id`.
    pub fn tree(&self, id: &OrgNodeId) -> Result<OrgTreeNode, HierarchyError> {
        let mut visited = BTreeSet::new();
        self.build_tree(id, 0, &mut visited)
    }

    /// Nested tree for the whole chart; `None` when no root exists yet.
    pub fn full_tree(&self) -> Result<Option<OrgTreeNode>, HierarchyError> {
        match &self.root {
            Some(root) => self.tree(root).map(Some),
            None => Ok(None),
        }
    }

    fn build_tree(
        &self,
        id: &OrgNodeId,
        depth: usize,
        visited: &mut BTreeSet<OrgNodeId>,
    ) -> Result<OrgTreeNode, HierarchyError> {
        if depth > MAX_DEPTH {
            return Err(HierarchyError::DepthExceeded);
        }
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| HierarchyError::NodeNotFound(id.clone()))?;
        visited.insert(id.clone());

        let mut subordinates = Vec::new();
        if let Some(children) = self.children.get(id) {
            for child in children {
                if visited.contains(child) {
                    continue;
                }
                subordinates.push(self.build_tree(child, depth + 1, visited)?);
            }
        }

        Ok(OrgTreeNode {
            id: node.id.clone(),
            user_id: node.user_id.clone(),
            subordinates,
        })
    }
}
