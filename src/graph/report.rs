//! Flat reports, report diffing and the hierarchy-preserving tree view.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::{Arena, Edge, NodeId, NodeSlot};
use crate::status::{HealthStatus, Importance};

/// One node's line in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Node name.
    pub name: String,
    /// Cached effective status.
    pub status: HealthStatus,
    /// Reason for a non-healthy status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Number of outgoing edges.
    pub dependency_count: usize,
}

impl NodeReport {
    pub(crate) fn from_slot(slot: &NodeSlot) -> Self {
        let evaluation = slot.evaluation.load_full();
        Self {
            name: slot.name.clone(),
            status: evaluation.status,
            reason: evaluation.reason.clone(),
            dependency_count: slot.dependencies.load().len(),
        }
    }
}

/// Point-in-time view of every indexed node, in discovery order.
///
/// Every report published by a graph is the outcome of exactly one wave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Sequence number of the wave that produced the report.
    pub wave: u64,
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// One entry per indexed node.
    pub entries: Vec<NodeReport>,
}

impl Report {
    /// Creates a report stamped with the current time.
    #[must_use]
    pub fn new(wave: u64, entries: Vec<NodeReport>) -> Self {
        Self {
            wave,
            generated_at: Utc::now(),
            entries,
        }
    }

    /// Looks up an entry by node name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NodeReport> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the report has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &NodeReport> {
        self.entries.iter()
    }

    /// Worst status over all entries; `Healthy` for an empty report.
    #[must_use]
    pub fn worst_status(&self) -> HealthStatus {
        self.entries
            .iter()
            .map(|entry| entry.status)
            .max()
            .unwrap_or_default()
    }

    /// Content equality: ignores entry order, `wave` and `generated_at`.
    #[must_use]
    pub fn same_content(&self, other: &Report) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        let theirs: HashMap<&str, &NodeReport> = other
            .entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect();
        self.entries
            .iter()
            .all(|entry| theirs.get(entry.name.as_str()) == Some(&entry))
    }

    /// Status changes from `previous` to `next`, keyed by node name.
    ///
    /// A name only in `next` appears with previous `Unknown`; a name only in
    /// `previous` appears with current `Unknown`. Records follow `next`'s order,
    /// then vanished names in `previous`'s order.
    #[must_use]
    pub fn diff(previous: &Report, next: &Report) -> Vec<StatusChange> {
        let before: HashMap<&str, &NodeReport> = previous
            .entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect();
        let after: HashSet<&str> = next.entries.iter().map(|entry| entry.name.as_str()).collect();

        let mut changes = Vec::new();
        for entry in &next.entries {
            let previous_status = match before.get(entry.name.as_str()) {
                Some(prev) if prev.status == entry.status => continue,
                Some(prev) => prev.status,
                None => HealthStatus::Unknown,
            };
            changes.push(StatusChange {
                name: entry.name.clone(),
                previous: previous_status,
                current: entry.status,
                reason: entry.reason.clone(),
            });
        }

        for entry in &previous.entries {
            if !after.contains(entry.name.as_str()) {
                changes.push(StatusChange {
                    name: entry.name.clone(),
                    previous: entry.status,
                    current: HealthStatus::Unknown,
                    reason: None,
                });
            }
        }
        changes
    }
}

/// A node whose status differs between two reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Node name.
    pub name: String,
    /// Status in the older report.
    pub previous: HealthStatus,
    /// Status in the newer report.
    pub current: HealthStatus,
    /// Reason carried by the newer report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A node in a [`TreeSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Node name.
    pub name: String,
    /// Cached effective status.
    pub status: HealthStatus,
    /// Reason for a non-healthy status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Importance of the edge from the parent; `None` for roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<Importance>,
    /// True if this entry closes a cycle; its dependencies are not expanded.
    #[serde(default)]
    pub cycle: bool,
    /// Indices into [`TreeSnapshot::nodes`], in edge order.
    pub dependencies: Vec<usize>,
}

/// Hierarchy-preserving report rooted at the graph's roots.
///
/// The tree is stored flat: every entry lives in `nodes` and refers to its
/// children by index, so depth is bounded by memory only. Shared
/// dependencies appear under every parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Wave of the report the tree was taken alongside.
    pub wave: u64,
    /// Every entry, in depth-first pre-order.
    pub nodes: Vec<TreeNode>,
    /// Indices of the root entries, one per graph root.
    pub roots: Vec<usize>,
}

impl TreeSnapshot {
    /// Entry at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TreeNode> {
        self.nodes.get(index)
    }

    /// Root entries in graph root order.
    pub fn root_nodes(&self) -> impl Iterator<Item = &TreeNode> + '_ {
        self.roots.iter().filter_map(|&index| self.nodes.get(index))
    }

    /// Direct dependencies of `node`, in edge order.
    pub fn children<'a>(&'a self, node: &'a TreeNode) -> impl Iterator<Item = &'a TreeNode> + 'a {
        node.dependencies.iter().filter_map(|&index| self.nodes.get(index))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node with the given name, depth-first.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&TreeNode> {
        self.nodes.iter().find(|node| node.name == name)
    }
}

fn tree_entry(slot: &NodeSlot, importance: Option<Importance>, cycle: bool) -> TreeNode {
    let evaluation = slot.evaluation.load_full();
    TreeNode {
        name: slot.name.clone(),
        status: evaluation.status,
        reason: evaluation.reason.clone(),
        importance,
        cycle,
        dependencies: Vec::new(),
    }
}

/// Expands every root depth-first with an explicit stack. A node already on
/// the current path is emitted as a leaf with `cycle` set.
pub(crate) fn build_tree(arena: &Arena, wave: u64, roots: &[Arc<NodeSlot>]) -> TreeSnapshot {
    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut root_indices = Vec::with_capacity(roots.len());
    let mut path: HashSet<NodeId> = HashSet::new();

    for root in roots {
        let root_index = nodes.len();
        nodes.push(tree_entry(root, None, false));
        root_indices.push(root_index);
        path.insert(root.id);

        let mut stack: Vec<(usize, NodeId, Arc<Vec<Edge>>, usize)> =
            vec![(root_index, root.id, root.dependencies.load_full(), 0)];
        while let Some((parent, id, edges, next)) = stack.last_mut() {
            let Some(edge) = edges.get(*next).copied() else {
                let done = *id;
                path.remove(&done);
                stack.pop();
                continue;
            };
            *next += 1;
            let parent = *parent;

            let Some(target) = arena.slot(edge.target) else {
                continue;
            };
            let cycle = path.contains(&target.id);
            let child = nodes.len();
            nodes.push(tree_entry(&target, Some(edge.importance), cycle));
            nodes[parent].dependencies.push(child);

            if !cycle {
                path.insert(target.id);
                stack.push((child, target.id, target.dependencies.load_full(), 0));
            }
        }
    }

    TreeSnapshot {
        wave,
        nodes,
        roots: root_indices,
    }
}
