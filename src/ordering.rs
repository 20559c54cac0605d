use crate::hierarchy::{HierarchyStore, NodeIdx};
use crate::model::{name_key, NodeKey, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sibling {
    pub id: String,
    pub name: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub id: String,
    pub position: i64,
}

/// Full new order for every child of one parent. Applied as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderCommand {
    pub parent: NodeKey,
    pub entries: Vec<PositionEntry>,
}

impl ReorderCommand {
    pub fn ordered_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("{id} cannot move {}: already at the boundary", .direction.as_str())]
    BoundaryReached { id: String, direction: Direction },
    #[error("{0} is not among the siblings")]
    NotFound(String),
    #[error("{0} kind cannot be reordered")]
    NotOrderable(NodeKind),
    #[error("ordered ids contain duplicate {0}")]
    Duplicate(String),
    #[error("ordered ids must include every sibling exactly once (expected {expected}, got {got})")]
    Incomplete { expected: usize, got: usize },
}

impl OrderingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BoundaryReached { .. } => "boundary_reached",
            Self::NotFound(_) => "not_found",
            Self::NotOrderable(_) | Self::Duplicate(_) | Self::Incomplete { .. } => "bad_params",
        }
    }
}

/// Parent key and current siblings (position order) of a folder or list.
pub fn siblings_of(
    store: &HierarchyStore,
    key: &NodeKey,
) -> Result<(NodeKey, Vec<Sibling>), OrderingError> {
    if !matches!(key.kind, NodeKind::Folder | NodeKind::List) {
        return Err(OrderingError::NotOrderable(key.kind));
    }
    let idx = store
        .lookup(key)
        .ok_or_else(|| OrderingError::NotFound(key.id.clone()))?;
    let parent = store
        .parent(idx)
        .ok_or_else(|| OrderingError::NotFound(key.id.clone()))?;
    Ok((store.key(parent).clone(), children_as_siblings(store, parent)))
}

/// Current ordered children of `parent` (a program or folder).
pub fn children_of(
    store: &HierarchyStore,
    parent: &NodeKey,
) -> Result<Vec<Sibling>, OrderingError> {
    if !matches!(parent.kind, NodeKind::Program | NodeKind::Folder) {
        return Err(OrderingError::NotOrderable(parent.kind));
    }
    let idx = store
        .lookup(parent)
        .ok_or_else(|| OrderingError::NotFound(parent.id.clone()))?;
    Ok(children_as_siblings(store, idx))
}

fn children_as_siblings(store: &HierarchyStore, parent: NodeIdx) -> Vec<Sibling> {
    store
        .children(parent)
        .iter()
        .map(|c| Sibling {
            id: store.key(*c).id.clone(),
            name: store.name(*c).to_string(),
            position: store.position(*c),
        })
        .collect()
}

/// Sorts by (position, name, id) and rewrites positions to 0..n-1.
pub fn normalize(siblings: &[Sibling]) -> Vec<Sibling> {
    let mut out = siblings.to_vec();
    out.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| name_key(&a.name).cmp(&name_key(&b.name)))
            .then_with(|| a.id.cmp(&b.id))
    });
    for (i, s) in out.iter_mut().enumerate() {
        s.position = i as i64;
    }
    out
}

/// Swaps `id` with its neighbour and returns the whole sibling set renumbered.
pub fn move_sibling(
    parent: &NodeKey,
    siblings: &[Sibling],
    id: &str,
    direction: Direction,
) -> Result<ReorderCommand, OrderingError> {
    let mut ordered = normalize(siblings);
    let at = ordered
        .iter()
        .position(|s| s.id == id)
        .ok_or_else(|| OrderingError::NotFound(id.to_string()))?;
    let other = match direction {
        Direction::Up if at > 0 => at - 1,
        Direction::Down if at + 1 < ordered.len() => at + 1,
        _ => {
            return Err(OrderingError::BoundaryReached {
                id: id.to_string(),
                direction,
            })
        }
    };
    ordered.swap(at, other);
    Ok(command(parent, ordered.iter().map(|s| s.id.as_str())))
}

/// Builds a command from an explicit permutation of the current siblings.
pub fn reorder_to(
    parent: &NodeKey,
    siblings: &[Sibling],
    ordered_ids: &[String],
) -> Result<ReorderCommand, OrderingError> {
    let current: HashSet<&str> = siblings.iter().map(|s| s.id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for id in ordered_ids {
        if !seen.insert(id.as_str()) {
            return Err(OrderingError::Duplicate(id.clone()));
        }
        if !current.contains(id.as_str()) {
            return Err(OrderingError::NotFound(id.clone()));
        }
    }
    if seen.len() != current.len() {
        return Err(OrderingError::Incomplete {
            expected: current.len(),
            got: seen.len(),
        });
    }
    Ok(command(parent, ordered_ids.iter().map(String::as_str)))
}

fn command<'a>(parent: &NodeKey, ids: impl Iterator<Item = &'a str>) -> ReorderCommand {
    ReorderCommand {
        parent: parent.clone(),
        entries: ids
            .enumerate()
            .map(|(i, id)| PositionEntry {
                id: id.to_string(),
                position: i as i64,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::tests::sample;

    fn sibs(names: &[(&str, i64)]) -> Vec<Sibling> {
        names
            .iter()
            .map(|(id, pos)| Sibling {
                id: id.to_string(),
                name: id.to_uppercase(),
                position: *pos,
            })
            .collect()
    }

    fn parent() -> NodeKey {
        NodeKey::program("p1")
    }

    // Siblings rewritten with the command's positions, in the new order.
    fn apply(cmd: &ReorderCommand, siblings: &[Sibling]) -> Vec<Sibling> {
        cmd.entries
            .iter()
            .filter_map(|e| {
                siblings.iter().find(|s| s.id == e.id).map(|s| Sibling {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    position: e.position,
                })
            })
            .collect()
    }

    #[test]
    fn moves_past_the_edges_report_boundary() {
        let s = sibs(&[("a", 0), ("b", 1), ("c", 2)]);
        let up = move_sibling(&parent(), &s, "a", Direction::Up).unwrap_err();
        assert_eq!(
            up,
            OrderingError::BoundaryReached {
                id: "a".into(),
                direction: Direction::Up
            }
        );
        let down = move_sibling(&parent(), &s, "c", Direction::Down).unwrap_err();
        assert_eq!(down.code(), "boundary_reached");
    }

    #[test]
    fn move_swaps_with_neighbour_and_renumbers() {
        let s = sibs(&[("a", 0), ("b", 1), ("c", 2)]);
        let cmd = move_sibling(&parent(), &s, "c", Direction::Up).unwrap();
        assert_eq!(cmd.ordered_ids(), vec!["a", "c", "b"]);
        let positions: Vec<i64> = cmd.entries.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn repeated_moves_keep_a_dense_permutation() {
        let mut s = sibs(&[("a", 0), ("b", 1), ("c", 2), ("d", 3), ("e", 4)]);
        let script = [
            ("e", Direction::Up),
            ("e", Direction::Up),
            ("a", Direction::Down),
            ("a", Direction::Up),
            ("c", Direction::Down),
            ("d", Direction::Up),
            ("b", Direction::Down),
        ];
        for (id, dir) in script {
            match move_sibling(&parent(), &s, id, dir) {
                Ok(cmd) => s = apply(&cmd, &s),
                Err(OrderingError::BoundaryReached { .. }) => {}
                Err(e) => panic!("unexpected {e}"),
            }
            let mut positions: Vec<i64> = s.iter().map(|x| x.position).collect();
            positions.sort_unstable();
            assert_eq!(positions, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn normalize_heals_gaps_and_ties() {
        let s = sibs(&[("b", 5), ("a", 5), ("c", -1)]);
        let n = normalize(&s);
        let ids: Vec<&str> = n.iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(n.iter().map(|x| x.position).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn reorder_to_requires_a_full_permutation() {
        let s = sibs(&[("a", 0), ("b", 1)]);
        let ok = reorder_to(&parent(), &s, &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(ok.ordered_ids(), vec!["b", "a"]);
        assert_eq!(
            reorder_to(&parent(), &s, &["a".to_string(), "a".to_string()]).unwrap_err(),
            OrderingError::Duplicate("a".into())
        );
        assert_eq!(
            reorder_to(&parent(), &s, &["a".to_string()]).unwrap_err(),
            OrderingError::Incomplete {
                expected: 2,
                got: 1
            }
        );
        assert_eq!(
            reorder_to(&parent(), &s, &["a".to_string(), "z".to_string()]).unwrap_err(),
            OrderingError::NotFound("z".into())
        );
    }

    #[test]
    fn siblings_are_scoped_to_the_parent() {
        let store = sample();
        let (parent, s) = siblings_of(&store, &NodeKey::list("l2")).unwrap();
        assert_eq!(parent, NodeKey::folder("f1"));
        assert_eq!(s.iter().map(|x| x.id.as_str()).collect::<Vec<_>>(), vec!["l1", "l2"]);
        let err = siblings_of(&store, &NodeKey::course("c1")).unwrap_err();
        assert_eq!(err, OrderingError::NotOrderable(NodeKind::Course));
        assert_eq!(err.to_string(), "course kind cannot be reordered");
        assert_eq!(
            children_of(&store, &NodeKey::list("l1")).unwrap_err().to_string(),
            "list kind cannot be reordered"
        );
    }
}
