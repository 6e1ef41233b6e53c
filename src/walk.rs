//! Iterative graph traversals shared by nodes and graphs.
//!
//! All walks keep a visited set, so each node is yielded at most once and
//! cycles terminate. None of them recurse.

use std::collections::HashSet;
use std::sync::Arc;

use crate::node::{Arena, NodeId, NodeSlot};

/// `origins` and all of their ancestors, children before parents.
///
/// Reverse post-order over parent edges. Edges closing a cycle are skipped,
/// so the node that closes a loop is read with its previous cached value.
pub(crate) fn upward_order(arena: &Arena, origins: &[NodeId]) -> Vec<Arc<NodeSlot>> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut postorder = Vec::new();

    for &origin in origins {
        if !visited.insert(origin) {
            continue;
        }
        let Some(slot) = arena.slot(origin) else {
            continue;
        };
        let parents = slot.parents.load_full();
        let mut stack: Vec<(Arc<NodeSlot>, Arc<Vec<NodeId>>, usize)> = vec![(slot, parents, 0)];

        while let Some((_, parents, next)) = stack.last_mut() {
            if let Some(&parent) = parents.get(*next) {
                *next += 1;
                if visited.insert(parent) {
                    if let Some(slot) = arena.slot(parent) {
                        let parents = slot.parents.load_full();
                        stack.push((slot, parents, 0));
                    }
                }
            } else if let Some((slot, _, _)) = stack.pop() {
                postorder.push(slot);
            }
        }
    }

    postorder.reverse();
    postorder
}

/// Nodes reachable from `roots` along dependency edges.
#[derive(Default)]
pub(crate) struct DownwardWalk {
    /// Discovery order.
    pub(crate) preorder: Vec<Arc<NodeSlot>>,
    /// Leaves first; a node follows all of its non-cyclic dependencies.
    pub(crate) postorder: Vec<Arc<NodeSlot>>,
}

pub(crate) fn walk_down(arena: &Arena, roots: &[NodeId]) -> DownwardWalk {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut walk = DownwardWalk::default();

    for &root in roots {
        if !visited.insert(root) {
            continue;
        }
        let Some(slot) = arena.slot(root) else {
            continue;
        };
        walk.preorder.push(Arc::clone(&slot));
        let edges = slot.dependencies.load_full();
        let mut stack = vec![(slot, edges, 0usize)];

        while let Some((_, edges, next)) = stack.last_mut() {
            if let Some(edge) = edges.get(*next) {
                let target = edge.target;
                *next += 1;
                if visited.insert(target) {
                    if let Some(slot) = arena.slot(target) {
                        walk.preorder.push(Arc::clone(&slot));
                        let edges = slot.dependencies.load_full();
                        stack.push((slot, edges, 0));
                    }
                }
            } else if let Some((slot, _, _)) = stack.pop() {
                walk.postorder.push(slot);
            }
        }
    }

    walk
}
