use crate::hierarchy::{HierarchyStore, NodeIdx};
use crate::model::{NodeKey, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Unchecked,
    Checked,
    Indeterminate,
}

/// Which level of the tree holds the ground-truth selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Course,
    List,
}

impl Granularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "course" => Some(Self::Course),
            "list" => Some(Self::List),
            _ => None,
        }
    }

    pub fn leaf_kind(self) -> NodeKind {
        match self {
            Self::Course => NodeKind::Course,
            Self::List => NodeKind::List,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub kind: NodeKind,
    pub id: String,
    pub state: CheckState,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("node {0} not found")]
    UnknownNode(NodeKey),
}

impl SelectionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownNode(_) => "not_found",
        }
    }
}

/// Tri-state selection derived from a set of selected leaf ids.
///
/// Only leaf ids are stored; checked/indeterminate for every other node is
/// recomputed from the hierarchy on demand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    granularity: Granularity,
    selected: BTreeSet<String>,
}

impl Selection {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            selected: BTreeSet::new(),
        }
    }

    #[cfg(test)]
    pub fn from_leaves<I, S>(granularity: Granularity, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granularity,
            selected: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn compute_state(
        &self,
        store: &HierarchyStore,
        key: &NodeKey,
    ) -> Result<CheckState, SelectionError> {
        let idx = store
            .lookup(key)
            .ok_or_else(|| SelectionError::UnknownNode(key.clone()))?;
        Ok(self.state_at(store, idx))
    }

    fn state_at(&self, store: &HierarchyStore, idx: NodeIdx) -> CheckState {
        let leaf_kind = self.granularity.leaf_kind();
        let key = store.key(idx);
        if key.kind.depth() >= leaf_kind.depth() {
            return match self.leaf_for(store, idx) {
                Some(leaf) if self.selected.contains(&store.key(leaf).id) => CheckState::Checked,
                _ => CheckState::Unchecked,
            };
        }

        let leaves = store.nodes_of_kind_under(idx, leaf_kind);
        let hits = leaves
            .iter()
            .filter(|l| self.selected.contains(&store.key(**l).id))
            .count();
        if hits == 0 {
            CheckState::Unchecked
        } else if hits == leaves.len() {
            CheckState::Checked
        } else {
            CheckState::Indeterminate
        }
    }

    // Leaf node that owns `idx` when `idx` sits at or below the leaf level.
    fn leaf_for(&self, store: &HierarchyStore, idx: NodeIdx) -> Option<NodeIdx> {
        let leaf_kind = self.granularity.leaf_kind();
        if store.key(idx).kind == leaf_kind {
            return Some(idx);
        }
        store
            .ancestors(idx)
            .into_iter()
            .find(|a| store.key(*a).kind == leaf_kind)
    }

    fn leaves_under(&self, store: &HierarchyStore, idx: NodeIdx) -> Vec<NodeIdx> {
        let leaf_kind = self.granularity.leaf_kind();
        if store.key(idx).kind.depth() > leaf_kind.depth() {
            return self.leaf_for(store, idx).into_iter().collect();
        }
        store.nodes_of_kind_under(idx, leaf_kind)
    }

    /// Flips `key`: a checked node clears its subtree, anything else selects it fully.
    pub fn toggle(&self, store: &HierarchyStore, key: &NodeKey) -> Result<Self, SelectionError> {
        let target = self.compute_state(store, key)? != CheckState::Checked;
        self.set(store, key, target)
    }

    pub fn set(
        &self,
        store: &HierarchyStore,
        key: &NodeKey,
        selected: bool,
    ) -> Result<Self, SelectionError> {
        let idx = store
            .lookup(key)
            .ok_or_else(|| SelectionError::UnknownNode(key.clone()))?;
        let mut next = self.clone();
        for leaf in self.leaves_under(store, idx) {
            let id = &store.key(leaf).id;
            if selected {
                next.selected.insert(id.clone());
            } else {
                next.selected.remove(id);
            }
        }
        Ok(next)
    }

    /// Auto-includes a newly created child when its nearest ancestor that had
    /// any leaves was fully checked. Empty ancestors, and ancestors created in
    /// the same step, are looked through.
    ///
    /// `before` is the hierarchy prior to the create, `after` includes `child`.
    pub fn child_added(
        &self,
        before: &HierarchyStore,
        after: &HierarchyStore,
        child: &NodeKey,
    ) -> Self {
        let Some(child_idx) = after.lookup(child) else {
            return self.clone();
        };
        let deciding = after
            .ancestors(child_idx)
            .into_iter()
            .filter_map(|a| before.lookup(after.key(a)))
            .find(|b| !self.leaves_under(before, *b).is_empty());
        let was_checked = deciding
            .map(|b| self.state_at(before, b) == CheckState::Checked)
            .unwrap_or(false);
        if !was_checked {
            return self.clone();
        }
        let mut next = self.clone();
        for leaf in after.nodes_of_kind_under(child_idx, self.granularity.leaf_kind()) {
            next.selected.insert(after.key(leaf).id.clone());
        }
        next
    }

    /// Drops selected ids that no longer exist in `store`.
    pub fn prune(&self, store: &HierarchyStore) -> Self {
        let kind = self.granularity.leaf_kind();
        Self {
            granularity: self.granularity,
            selected: self
                .selected
                .iter()
                .filter(|id| store.contains(&NodeKey::new(kind, id.as_str())))
                .cloned()
                .collect(),
        }
    }

    /// State of every node in the hierarchy, in tree order.
    pub fn states(&self, store: &HierarchyStore) -> Vec<NodeState> {
        let mut out = Vec::new();
        for root in store.roots().iter().chain(store.detached().iter()) {
            for idx in std::iter::once(*root).chain(store.descendants(*root)) {
                out.push(self.node_state(store, idx));
            }
        }
        out
    }

    /// States touched by a toggle of `key`: its ancestors, itself and its subtree.
    pub fn affected_states(
        &self,
        store: &HierarchyStore,
        key: &NodeKey,
    ) -> Result<Vec<NodeState>, SelectionError> {
        let idx = store
            .lookup(key)
            .ok_or_else(|| SelectionError::UnknownNode(key.clone()))?;
        let mut nodes = store.ancestors(idx);
        nodes.reverse();
        nodes.push(idx);
        nodes.extend(store.descendants(idx));
        Ok(nodes
            .into_iter()
            .map(|n| self.node_state(store, n))
            .collect())
    }

    fn node_state(&self, store: &HierarchyStore, idx: NodeIdx) -> NodeState {
        let key = store.key(idx);
        NodeState {
            kind: key.kind,
            id: key.id.clone(),
            state: self.state_at(store, idx),
        }
    }

    /// Course ids covered by the selection, in tree order.
    pub fn selected_courses(&self, store: &HierarchyStore) -> Vec<String> {
        let leaf_kind = self.granularity.leaf_kind();
        let mut out = Vec::new();
        for key in store.keys_of_kind(leaf_kind) {
            if !self.selected.contains(&key.id) {
                continue;
            }
            let Some(idx) = store.lookup(&key) else {
                continue;
            };
            for course in store.nodes_of_kind_under(idx, NodeKind::Course) {
                out.push(store.key(course).id.clone());
            }
        }
        out
    }
}
