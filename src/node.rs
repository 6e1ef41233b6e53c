//! Nodes, edges and the registry arena that owns them.
//!
//! Every node lives in a `HealthRegistry` slot addressed by a stable `NodeId`.
//! Adjacency is stored as id lists on both endpoints, so nodes never own each
//! other and cyclic topologies create no ownership cycles. Edge lists are
//! immutable vectors swapped wholesale on each write; readers never lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::aggregate::{aggregate, DependencyInput};
use crate::error::{lock_err, GraphError, GraphResult, TopologyError, ValidationError};
use crate::graph::GraphId;
use crate::status::{HealthEvaluation, HealthStatus, Importance};
use crate::walk;

/// Error returned by a failing intrinsic check.
pub type CheckError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a fallible intrinsic check.
pub type CheckResult = Result<HealthEvaluation, CheckError>;

type IntrinsicCheck = dyn Fn() -> CheckResult + Send + Sync;

/// Stable identifier of a node within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Returns the raw slot index.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// How a node was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Runs an intrinsic check.
    Check,
    /// Always-healthy intrinsic, status comes from dependencies only.
    Aggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edge {
    pub(crate) target: NodeId,
    pub(crate) importance: Importance,
}

/// Hook through which a graph coordinates propagation for its nodes.
pub(crate) trait PropagationHook: Send + Sync {
    /// Runs one propagation wave starting at `origins`.
    fn propagate(&self, origins: &[NodeId]) -> GraphResult<()>;
}

pub(crate) struct NodeSlot {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    kind: NodeKind,
    check: Box<IntrinsicCheck>,
    /// Serializes writers of `dependencies` and `parents`.
    topology: Mutex<()>,
    pub(crate) dependencies: ArcSwap<Vec<Edge>>,
    pub(crate) parents: ArcSwap<Vec<NodeId>>,
    intrinsic: ArcSwap<HealthEvaluation>,
    /// Held across read-compute-store of `evaluation`.
    aggregation: Mutex<()>,
    pub(crate) evaluation: ArcSwap<HealthEvaluation>,
    evaluations: AtomicU64,
    hooks: Mutex<HashMap<GraphId, Weak<dyn PropagationHook>>>,
}

impl NodeSlot {
    fn new(id: NodeId, name: String, kind: NodeKind, check: Box<IntrinsicCheck>, seed: HealthEvaluation) -> Self {
        // Zero dependencies: the seeded evaluation is the intrinsic one.
        let evaluation = aggregate(&seed, &[]);
        Self {
            id,
            name,
            kind,
            check,
            topology: Mutex::new(()),
            dependencies: ArcSwap::from_pointee(Vec::new()),
            parents: ArcSwap::from_pointee(Vec::new()),
            intrinsic: ArcSwap::from_pointee(seed),
            aggregation: Mutex::new(()),
            evaluation: ArcSwap::from_pointee(evaluation),
            evaluations: AtomicU64::new(0),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Re-runs the intrinsic check and stores its result.
    ///
    /// On failure the previous intrinsic evaluation is kept.
    pub(crate) fn run_check(&self) -> GraphResult<()> {
        let evaluation = (self.check)().map_err(|source| GraphError::CheckFailed {
            node: self.name.clone(),
            source,
        })?;
        self.intrinsic.store(Arc::new(evaluation));
        Ok(())
    }

    /// Recomputes the cached evaluation from the intrinsic result and the
    /// dependencies' cached evaluations. Returns true if it changed.
    ///
    /// Concurrent callers on the same slot are serialized, so a later store
    /// is always computed from inputs at least as new as an earlier one.
    pub(crate) fn reaggregate(&self, arena: &Arena) -> bool {
        let _guard = self.aggregation.lock().unwrap_or_else(PoisonError::into_inner);
        let edges = self.dependencies.load_full();
        let targets: Vec<(Arc<NodeSlot>, Importance)> = edges
            .iter()
            .filter_map(|edge| arena.slot(edge.target).map(|slot| (slot, edge.importance)))
            .collect();
        let evaluations: Vec<Arc<HealthEvaluation>> =
            targets.iter().map(|(slot, _)| slot.evaluation.load_full()).collect();
        let inputs: Vec<DependencyInput<'_>> = targets
            .iter()
            .zip(&evaluations)
            .map(|((slot, importance), evaluation)| DependencyInput {
                name: &slot.name,
                evaluation: evaluation.as_ref(),
                importance: *importance,
            })
            .collect();

        let next = aggregate(&self.intrinsic.load(), &inputs);
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let changed = **self.evaluation.load() != next;
        trace!(node = %self.name, status = %next.status, changed, "re-aggregated");
        if changed {
            self.evaluation.store(Arc::new(next));
        }
        changed
    }

    pub(crate) fn attach(&self, graph: GraphId, hook: Weak<dyn PropagationHook>) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(graph, hook);
    }

    pub(crate) fn detach(&self, graph: GraphId) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&graph);
    }

    /// Live hooks, optionally skipping one graph.
    pub(crate) fn hooks(&self, except: Option<GraphId>) -> Vec<(GraphId, Arc<dyn PropagationHook>)> {
        let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        hooks
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .filter_map(|(id, hook)| hook.upgrade().map(|hook| (*id, hook)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn hook_count(&self) -> usize {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Append-only node storage shared by every handle of one registry.
pub(crate) struct Arena {
    id: Uuid,
    slots: ArcSwap<Vec<Arc<NodeSlot>>>,
    /// Name index; also serializes appends.
    names: Mutex<HashMap<String, NodeId>>,
}

impl Arena {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            slots: ArcSwap::from_pointee(Vec::new()),
            names: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn slot(&self, id: NodeId) -> Option<Arc<NodeSlot>> {
        let index = usize::try_from(id.0).ok()?;
        self.slots.load().get(index).cloned()
    }

    fn insert(&self, name: String, kind: NodeKind, check: Box<IntrinsicCheck>) -> GraphResult<Arc<NodeSlot>> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyNodeName.into());
        }

        if self.lookup(&name).is_some() {
            return Err(ValidationError::DuplicateNodeName { name }.into());
        }

        // The seed check runs unlocked; it may be slow or query the registry.
        let seed = check().map_err(|source| GraphError::CheckFailed {
            node: name.clone(),
            source,
        })?;

        let mut names = self.names.lock().map_err(|_| lock_err("registry names"))?;
        if names.contains_key(&name) {
            return Err(ValidationError::DuplicateNodeName { name }.into());
        }

        let current = self.slots.load_full();
        let id = NodeId(current.len() as u64);
        let slot = Arc::new(NodeSlot::new(id, name.clone(), kind, check, seed));

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::clone(&slot));
        self.slots.store(Arc::new(next));
        names.insert(name, id);

        debug!(node = %slot.name, id = %id, ?kind, "node created");
        Ok(slot)
    }

    fn lookup(&self, name: &str) -> Option<Arc<NodeSlot>> {
        let id = self
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()?;
        self.slot(id)
    }

    fn len(&self) -> usize {
        self.slots.load().len()
    }
}

/// Factory and owner of nodes.
///
/// Cloning a registry yields another handle to the same arena.
///
/// # Examples
///
/// ```
/// use healthgraph::{HealthEvaluation, HealthRegistry, HealthStatus, Importance};
///
/// let registry = HealthRegistry::new();
/// let payment = registry.check_node("payment", || HealthEvaluation::unhealthy("timeout")).unwrap();
/// let checkout = registry.aggregation_node("checkout").unwrap();
/// checkout.depends_on(&payment, Importance::Required).unwrap();
/// assert_eq!(checkout.status(), HealthStatus::Unhealthy);
/// ```
#[derive(Clone)]
pub struct HealthRegistry {
    arena: Arc<Arena>,
}

impl HealthRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Arc::new(Arena::new()),
        }
    }

    /// Creates a node whose intrinsic check cannot fail.
    pub fn check_node<F>(&self, name: impl Into<String>, check: F) -> GraphResult<Node>
    where
        F: Fn() -> HealthEvaluation + Send + Sync + 'static,
    {
        self.create(name.into(), NodeKind::Check, Box::new(move || Ok(check())))
    }

    /// Creates a node whose intrinsic check may fail.
    ///
    /// The check runs once here to seed the cached evaluation; a failure is
    /// returned as `GraphError::CheckFailed`.
    pub fn try_check_node<F>(&self, name: impl Into<String>, check: F) -> GraphResult<Node>
    where
        F: Fn() -> CheckResult + Send + Sync + 'static,
    {
        self.create(name.into(), NodeKind::Check, Box::new(check))
    }

    /// Creates a check node with the default, always-healthy check.
    pub fn healthy_node(&self, name: impl Into<String>) -> GraphResult<Node> {
        self.create(name.into(), NodeKind::Check, Box::new(|| Ok(HealthEvaluation::healthy())))
    }

    /// Creates an aggregation-only node.
    pub fn aggregation_node(&self, name: impl Into<String>) -> GraphResult<Node> {
        self.create(name.into(), NodeKind::Aggregation, Box::new(|| Ok(HealthEvaluation::healthy())))
    }

    fn create(&self, name: String, kind: NodeKind, check: Box<IntrinsicCheck>) -> GraphResult<Node> {
        let slot = self.arena.insert(name, kind, check)?;
        Ok(Node::from_slot(slot, Arc::clone(&self.arena)))
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.arena
            .slot(id)
            .map(|slot| Node::from_slot(slot, Arc::clone(&self.arena)))
    }

    /// Returns the node with the given name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<Node> {
        self.arena
            .lookup(name)
            .map(|slot| Node::from_slot(slot, Arc::clone(&self.arena)))
    }

    /// Number of nodes ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Returns true if no node was created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthRegistry")
            .field("id", &self.arena.id)
            .field("nodes", &self.len())
            .finish()
    }
}

/// Outgoing edge of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The node depended upon.
    pub target: Node,
    /// Importance of the edge.
    pub importance: Importance,
}

/// Handle to a node in a registry.
///
/// Handles are cheap to clone; all clones refer to the same node.
#[derive(Clone)]
pub struct Node {
    slot: Arc<NodeSlot>,
    arena: Arc<Arena>,
}

impl Node {
    pub(crate) fn from_slot(slot: Arc<NodeSlot>, arena: Arc<Arena>) -> Self {
        Self { slot, arena }
    }

    pub(crate) fn slot(&self) -> &Arc<NodeSlot> {
        &self.slot
    }

    pub(crate) fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub(crate) fn same_registry(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena)
    }

    /// The node's id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.slot.id
    }

    /// The node's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// How the node was constructed.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.slot.kind
    }

    /// The cached effective evaluation.
    #[must_use]
    pub fn evaluation(&self) -> HealthEvaluation {
        HealthEvaluation::clone(&self.slot.evaluation.load())
    }

    /// The cached effective status.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.slot.evaluation.load().status
    }

    /// How many times this node has been re-aggregated.
    #[must_use]
    pub fn evaluation_count(&self) -> u64 {
        self.slot.evaluations.load(Ordering::Relaxed)
    }

    /// Outgoing edges, in insertion order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.slot
            .dependencies
            .load()
            .iter()
            .filter_map(|edge| {
                self.arena.slot(edge.target).map(|slot| Dependency {
                    target: Node::from_slot(slot, Arc::clone(&self.arena)),
                    importance: edge.importance,
                })
            })
            .collect()
    }

    /// Nodes that depend on this one.
    #[must_use]
    pub fn parents(&self) -> Vec<Node> {
        self.slot
            .parents
            .load()
            .iter()
            .filter_map(|id| self.arena.slot(*id))
            .map(|slot| Node::from_slot(slot, Arc::clone(&self.arena)))
            .collect()
    }

    /// Returns true if any node depends on this one.
    #[must_use]
    pub fn has_parents(&self) -> bool {
        !self.slot.parents.load().is_empty()
    }

    /// Adds an edge from this node to `target` and propagates the change.
    ///
    /// # Errors
    ///
    /// `TopologyError::DuplicateDependency` if the edge already exists (the
    /// existing edge is left untouched) and `TopologyError::ForeignNode` if
    /// `target` belongs to another registry. Both leave the topology unchanged.
    /// `GraphError::Internal` if an attached graph failed to run its wave; the
    /// edge is already added at that point and every other attached graph has
    /// still been notified.
    pub fn depends_on(&self, target: &Node, importance: Importance) -> GraphResult<&Self> {
        self.ensure_same_registry(target)?;
        {
            let _guards = lock_topology(&self.slot, &target.slot)?;
            let edges = self.slot.dependencies.load_full();
            if edges.iter().any(|edge| edge.target == target.id()) {
                return Err(TopologyError::DuplicateDependency {
                    source_name: self.name().to_string(),
                    target: target.name().to_string(),
                }
                .into());
            }

            let mut next = Vec::with_capacity(edges.len() + 1);
            next.extend(edges.iter().copied());
            next.push(Edge {
                target: target.id(),
                importance,
            });

            let parents = target.slot.parents.load_full();
            let mut next_parents = Vec::with_capacity(parents.len() + 1);
            next_parents.extend(parents.iter().copied());
            next_parents.push(self.id());

            target.slot.parents.store(Arc::new(next_parents));
            self.slot.dependencies.store(Arc::new(next));
        }

        debug!(source = %self.name(), target = %target.name(), %importance, "dependency added");
        self.propagate_change()?;
        Ok(self)
    }

    /// Removes the edge to `target`, if any, and propagates the change.
    ///
    /// Returns `false` without propagating when there was no such edge.
    ///
    /// # Errors
    ///
    /// `GraphError::Internal` if an attached graph failed to run its wave.
    /// The edge is already removed at that point and every other attached
    /// graph has still been notified.
    pub fn remove_dependency(&self, target: &Node) -> GraphResult<bool> {
        if !self.same_registry(target) {
            return Ok(false);
        }
        {
            let _guards = lock_topology(&self.slot, &target.slot)?;
            let edges = self.slot.dependencies.load_full();
            if !edges.iter().any(|edge| edge.target == target.id()) {
                return Ok(false);
            }

            let next: Vec<Edge> = edges
                .iter()
                .copied()
                .filter(|edge| edge.target != target.id())
                .collect();
            let next_parents: Vec<NodeId> = target
                .slot
                .parents
                .load()
                .iter()
                .copied()
                .filter(|id| *id != self.id())
                .collect();

            self.slot.dependencies.store(Arc::new(next));
            target.slot.parents.store(Arc::new(next_parents));
        }

        debug!(source = %self.name(), target = %target.name(), "dependency removed");
        self.propagate_change()?;
        Ok(true)
    }

    /// Re-runs the intrinsic check and propagates the result.
    ///
    /// # Errors
    ///
    /// `GraphError::CheckFailed` if the check fails; nothing is propagated and
    /// the node keeps its previous evaluation. `GraphError::Internal` if an
    /// attached graph failed to run its wave; the other graphs are still
    /// notified.
    pub fn refresh(&self) -> GraphResult<HealthEvaluation> {
        self.slot.run_check()?;
        self.propagate_change()?;
        Ok(self.evaluation())
    }

    /// Re-aggregates this node and its ancestors.
    ///
    /// Attached graphs coordinate the wave; detached nodes walk their parents
    /// directly.
    fn propagate_change(&self) -> GraphResult<()> {
        let hooks = self.slot.hooks(None);
        if hooks.is_empty() {
            for slot in walk::upward_order(&self.arena, &[self.id()]) {
                slot.reaggregate(&self.arena);
            }
            return Ok(());
        }

        let mut first_error = None;
        for (graph, hook) in hooks {
            if let Err(err) = hook.propagate(&[self.id()]) {
                warn!(node = %self.name(), %graph, error = %err, "graph failed to propagate change");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn ensure_same_registry(&self, other: &Node) -> GraphResult<()> {
        if self.same_registry(other) {
            Ok(())
        } else {
            Err(TopologyError::ForeignNode {
                name: other.name().to_string(),
            }
            .into())
        }
    }
}

/// Locks the topology of both endpoints in id order.
fn lock_topology<'a>(
    a: &'a NodeSlot,
    b: &'a NodeSlot,
) -> GraphResult<(MutexGuard<'a, ()>, Option<MutexGuard<'a, ()>>)> {
    if a.id == b.id {
        let guard = a.topology.lock().map_err(|_| lock_err("node topology"))?;
        return Ok((guard, None));
    }
    let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
    let first = first.topology.lock().map_err(|_| lock_err("node topology"))?;
    let second = second.topology.lock().map_err(|_| lock_err("node topology"))?;
    Ok((first, Some(second)))
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.same_registry(other) && self.id() == other.id()
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.arena.id.hash(state);
        self.id().hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
