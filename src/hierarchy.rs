use crate::model::{
    name_key, Course, CourseList, Folder, HierarchySnapshot, NodeKey, NodeKind, Program,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Arena slot of a node inside a [`HierarchyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(usize);

#[derive(Debug, Clone)]
struct Node {
    key: NodeKey,
    name: String,
    position: i64,
    // Index into the matching snapshot vector.
    slot: usize,
    parent: Option<NodeIdx>,
    children: Vec<NodeIdx>,
}

/// Normalized, parent-indexed view over one hierarchy snapshot.
///
/// The store is rebuilt from the repository for every request and is never
/// mutated in place; operations that change shape return a new store.
#[derive(Debug, Clone)]
pub struct HierarchyStore {
    snapshot: HierarchySnapshot,
    nodes: Vec<Node>,
    index: HashMap<NodeKey, NodeIdx>,
    roots: Vec<NodeIdx>,
    detached: Vec<NodeIdx>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionViolation {
    pub parent: NodeKey,
    pub positions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineNode {
    pub kind: NodeKind,
    pub id: String,
    pub name: String,
    pub position: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutlineNode>,
}

impl HierarchyStore {
    pub fn from_snapshot(snapshot: HierarchySnapshot) -> Self {
        let mut store = Self {
            snapshot: HierarchySnapshot::default(),
            nodes: Vec::new(),
            index: HashMap::new(),
            roots: Vec::new(),
            detached: Vec::new(),
        };

        let mut pending: Vec<(NodeIdx, Option<NodeKey>)> = Vec::new();
        for (slot, p) in snapshot.programs.iter().enumerate() {
            if let Some(idx) = store.push(NodeKey::program(&p.id), &p.name, 0, slot) {
                pending.push((idx, None));
            }
        }
        for (slot, f) in snapshot.folders.iter().enumerate() {
            if let Some(idx) = store.push(NodeKey::folder(&f.id), &f.name, f.position, slot) {
                pending.push((idx, Some(NodeKey::program(&f.program_id))));
            }
        }
        for (slot, l) in snapshot.lists.iter().enumerate() {
            if let Some(idx) = store.push(NodeKey::list(&l.id), &l.name, l.position, slot) {
                pending.push((idx, Some(NodeKey::folder(&l.folder_id))));
            }
        }
        for (slot, c) in snapshot.courses.iter().enumerate() {
            if let Some(idx) = store.push(NodeKey::course(&c.id), &c.title, slot as i64, slot) {
                pending.push((idx, c.list_id.as_deref().map(|id| NodeKey::list(id))));
            }
        }

        for (idx, parent_key) in pending {
            let is_program = store.nodes[idx.0].key.kind == NodeKind::Program;
            match parent_key.and_then(|k| store.index.get(&k).copied()) {
                Some(parent) => {
                    store.nodes[idx.0].parent = Some(parent);
                    store.nodes[parent.0].children.push(idx);
                }
                None if is_program => store.roots.push(idx),
                None => store.detached.push(idx),
            }
        }

        let mut nodes = std::mem::take(&mut store.nodes);
        for i in 0..nodes.len() {
            let mut children = std::mem::take(&mut nodes[i].children);
            children.sort_by(|a, b| sibling_order(&nodes[a.0], &nodes[b.0]));
            nodes[i].children = children;
        }
        store.roots.sort_by(|a, b| sibling_order(&nodes[a.0], &nodes[b.0]));
        store.nodes = nodes;
        store.snapshot = snapshot;
        store
    }

    fn push(&mut self, key: NodeKey, name: &str, position: i64, slot: usize) -> Option<NodeIdx> {
        if self.index.contains_key(&key) {
            return None;
        }
        let idx = NodeIdx(self.nodes.len());
        self.index.insert(key.clone(), idx);
        self.nodes.push(Node {
            key,
            name: name.to_string(),
            position,
            slot,
            parent: None,
            children: Vec::new(),
        });
        Some(idx)
    }

    pub fn snapshot(&self) -> &HierarchySnapshot {
        &self.snapshot
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeIdx> {
        self.index.get(key).copied()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn key(&self, idx: NodeIdx) -> &NodeKey {
        &self.nodes[idx.0].key
    }

    pub fn name(&self, idx: NodeIdx) -> &str {
        &self.nodes[idx.0].name
    }

    pub fn position(&self, idx: NodeIdx) -> i64 {
        self.nodes[idx.0].position
    }

    pub fn parent(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.nodes[idx.0].parent
    }

    pub fn children(&self, idx: NodeIdx) -> &[NodeIdx] {
        &self.nodes[idx.0].children
    }

    /// Programs in name order.
    pub fn roots(&self) -> &[NodeIdx] {
        &self.roots
    }

    /// Non-program nodes whose parent reference does not resolve.
    pub fn detached(&self) -> &[NodeIdx] {
        &self.detached
    }

    /// Ancestors of `idx`, nearest first.
    pub fn ancestors(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        let mut cur = self.nodes[idx.0].parent;
        while let Some(p) = cur {
            out.push(p);
            cur = self.nodes[p.0].parent;
        }
        out
    }

    /// All descendants of `idx` in pre-order, excluding `idx` itself.
    pub fn descendants(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeIdx> = self.nodes[idx.0].children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n.0].children.iter().rev().copied());
        }
        out
    }

    /// Nodes of `kind` at or below `idx`. Empty when `idx` sits below `kind`.
    pub fn nodes_of_kind_under(&self, idx: NodeIdx, kind: NodeKind) -> Vec<NodeIdx> {
        let own = self.nodes[idx.0].key.kind;
        if own == kind {
            return vec![idx];
        }
        if own.depth() > kind.depth() {
            return Vec::new();
        }
        self.descendants(idx)
            .into_iter()
            .filter(|n| self.nodes[n.0].key.kind == kind)
            .collect()
    }

    /// Every node key of `kind`, in tree order, including detached ones.
    pub fn keys_of_kind(&self, kind: NodeKind) -> Vec<NodeKey> {
        let mut out = Vec::new();
        for root in self.roots.iter().chain(self.detached.iter()) {
            for n in self.nodes_of_kind_under(*root, kind) {
                out.push(self.nodes[n.0].key.clone());
            }
        }
        out
    }

    pub fn program(&self, id: &str) -> Option<&Program> {
        let idx = self.lookup(&NodeKey::program(id))?;
        self.snapshot.programs.get(self.nodes[idx.0].slot)
    }

    pub fn folder(&self, id: &str) -> Option<&Folder> {
        let idx = self.lookup(&NodeKey::folder(id))?;
        self.snapshot.folders.get(self.nodes[idx.0].slot)
    }

    pub fn list(&self, id: &str) -> Option<&CourseList> {
        let idx = self.lookup(&NodeKey::list(id))?;
        self.snapshot.lists.get(self.nodes[idx.0].slot)
    }

    pub fn course(&self, id: &str) -> Option<&Course> {
        let idx = self.lookup(&NodeKey::course(id))?;
        self.snapshot.courses.get(self.nodes[idx.0].slot)
    }

    pub fn programs(&self) -> Vec<&Program> {
        self.roots
            .iter()
            .filter_map(|r| self.snapshot.programs.get(self.nodes[r.0].slot))
            .collect()
    }

    /// Folders of a program in position order.
    pub fn folders_of(&self, program_id: &str) -> Vec<&Folder> {
        self.children_of(&NodeKey::program(program_id))
            .filter_map(|slot| self.snapshot.folders.get(slot))
            .collect()
    }

    /// Lists of a folder in position order.
    pub fn lists_of(&self, folder_id: &str) -> Vec<&CourseList> {
        self.children_of(&NodeKey::folder(folder_id))
            .filter_map(|slot| self.snapshot.lists.get(slot))
            .collect()
    }

    fn children_of(&self, key: &NodeKey) -> impl Iterator<Item = usize> + '_ {
        self.lookup(key)
            .map(|idx| self.nodes[idx.0].children.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|c| self.nodes[c.0].slot)
    }

    pub fn programs_named(&self, name: &str) -> Vec<&Program> {
        let key = name_key(name);
        self.programs()
            .into_iter()
            .filter(|p| name_key(&p.name) == key)
            .collect()
    }

    pub fn folders_named(&self, program_id: &str, name: &str) -> Vec<&Folder> {
        let key = name_key(name);
        self.folders_of(program_id)
            .into_iter()
            .filter(|f| name_key(&f.name) == key)
            .collect()
    }

    pub fn lists_named(&self, folder_id: &str, name: &str) -> Vec<&CourseList> {
        let key = name_key(name);
        self.lists_of(folder_id)
            .into_iter()
            .filter(|l| name_key(&l.name) == key)
            .collect()
    }

    /// Keys removed by deleting `key`: the node itself and all descendants.
    pub fn cascade(&self, key: &NodeKey) -> Vec<NodeKey> {
        let Some(idx) = self.lookup(key) else {
            return Vec::new();
        };
        std::iter::once(idx)
            .chain(self.descendants(idx))
            .map(|n| self.nodes[n.0].key.clone())
            .collect()
    }

    /// A new store with `key` and everything under it removed.
    pub fn without(&self, key: &NodeKey) -> Self {
        let gone: HashSet<NodeKey> = self.cascade(key).into_iter().collect();
        let keep = |k: NodeKey| !gone.contains(&k);
        let s = &self.snapshot;
        Self::from_snapshot(HierarchySnapshot {
            programs: s
                .programs
                .iter()
                .filter(|p| keep(NodeKey::program(&p.id)))
                .cloned()
                .collect(),
            folders: s
                .folders
                .iter()
                .filter(|f| keep(NodeKey::folder(&f.id)))
                .cloned()
                .collect(),
            lists: s
                .lists
                .iter()
                .filter(|l| keep(NodeKey::list(&l.id)))
                .cloned()
                .collect(),
            courses: s
                .courses
                .iter()
                .filter(|c| keep(NodeKey::course(&c.id)))
                .cloned()
                .collect(),
        })
    }

    /// Parents whose ordered children do not carry positions 0..n-1.
    pub fn position_violations(&self) -> Vec<PositionViolation> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if !matches!(node.key.kind, NodeKind::Program | NodeKind::Folder) {
                continue;
            }
            let mut positions: Vec<i64> = node
                .children
                .iter()
                .map(|c| self.nodes[c.0].position)
                .collect();
            positions.sort_unstable();
            let dense = positions
                .iter()
                .enumerate()
                .all(|(i, p)| *p == i as i64);
            if !dense {
                out.push(PositionViolation {
                    parent: node.key.clone(),
                    positions,
                });
            }
        }
        out
    }

    /// Nested view of the tree for display.
    pub fn outline(&self) -> Vec<OutlineNode> {
        self.roots.iter().map(|r| self.outline_node(*r)).collect()
    }

    fn outline_node(&self, idx: NodeIdx) -> OutlineNode {
        let node = &self.nodes[idx.0];
        OutlineNode {
            kind: node.key.kind,
            id: node.key.id.clone(),
            name: node.name.clone(),
            position: node.position,
            children: node
                .children
                .iter()
                .map(|c| self.outline_node(*c))
                .collect(),
        }
    }
}

fn sibling_order(a: &Node, b: &Node) -> std::cmp::Ordering {
    if a.key.kind == NodeKind::Program {
        return name_key(&a.name)
            .cmp(&name_key(&b.name))
            .then_with(|| a.key.id.cmp(&b.key.id));
    }
    a.position
        .cmp(&b.position)
        .then_with(|| name_key(&a.name).cmp(&name_key(&b.name)))
        .then_with(|| a.key.id.cmp(&b.key.id))
}
