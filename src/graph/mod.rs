//! Materialized graph view.
//!
//! A `Graph` indexes every node reachable from its roots and coordinates
//! propagation for them. Waves are serialized by one graph-wide lock; each
//! wave re-aggregates the affected nodes, re-walks the topology, swaps in a new
//! snapshot and report, and then notifies subscribers outside the wave lock.
//! Lookups read the current snapshot without taking the lock.

mod cycles;
mod report;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{lock_err, GraphError, GraphResult, LookupError, TopologyError, ValidationError};
use crate::node::{Arena, Node, NodeId, NodeSlot, PropagationHook};
use crate::stream::{Broadcaster, Subscription};
use crate::walk;

pub use report::{NodeReport, Report, StatusChange, TreeNode, TreeSnapshot};

/// Unique identifier for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(Uuid);

impl GraphId {
    /// Create a new random graph id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Graph configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Per-subscriber stream buffer capacity.
    pub stream_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { stream_capacity: 64 }
    }
}

/// Nodes that entered or left a graph's index during one wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyChange {
    /// Newly reachable nodes, in discovery order.
    pub added: Vec<Node>,
    /// Nodes no longer reachable from the roots.
    pub removed: Vec<Node>,
}

impl TopologyChange {
    /// Returns true if nothing was added or removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Indexed nodes, published as one unit.
#[derive(Default)]
struct Snapshot {
    ordered: Vec<Arc<NodeSlot>>,
    members: HashSet<NodeId>,
    by_name: HashMap<String, usize>,
}

impl Snapshot {
    fn new(ordered: Vec<Arc<NodeSlot>>) -> Self {
        let members = ordered.iter().map(|slot| slot.id).collect();
        let by_name = ordered
            .iter()
            .enumerate()
            .map(|(index, slot)| (slot.name.clone(), index))
            .collect();
        Self {
            ordered,
            members,
            by_name,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Wave<'a> {
    /// Construction: full refresh, nothing published.
    Initial,
    /// Re-aggregate the origins and their ancestors.
    Propagate(&'a [NodeId]),
    /// Re-run every indexed node's check bottom-up.
    RefreshAll,
}

impl Wave<'_> {
    const fn label(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Propagate(_) => "propagate",
            Self::RefreshAll => "refresh_all",
        }
    }
}

/// State owned by whoever holds the wave lock.
#[derive(Default)]
struct WaveState {
    waves: u64,
    last_published: Option<Arc<Report>>,
}

struct GraphInner {
    id: GraphId,
    me: Weak<GraphInner>,
    arena: Arc<Arena>,
    roots: Vec<NodeId>,
    config: GraphConfig,
    wave: Mutex<WaveState>,
    /// Taken before the wave lock is released so dispatch follows wave order.
    dispatch: Mutex<()>,
    snapshot: ArcSwap<Snapshot>,
    report: ArcSwap<Report>,
    completed_waves: AtomicU64,
    status_changed: Arc<Broadcaster<Arc<Report>>>,
    topology_changed: Arc<Broadcaster<TopologyChange>>,
}

impl GraphInner {
    fn run_wave(&self, wave: Wave<'_>) -> GraphResult<Arc<Report>> {
        let mut state = self.wave.lock().map_err(|_| lock_err("graph wave"))?;
        let mut first_error = None;

        let (changed, topology) = match wave {
            Wave::Propagate(origins) => {
                let mut changed = Vec::new();
                for slot in walk::upward_order(&self.arena, origins) {
                    if slot.reaggregate(&self.arena) {
                        changed.push(slot.id);
                    }
                }
                let reachable = walk::walk_down(&self.arena, &self.roots);
                (changed, self.republish_snapshot(reachable.preorder))
            }
            Wave::Initial | Wave::RefreshAll => {
                let reachable = walk::walk_down(&self.arena, &self.roots);
                let changed = self.refresh_bottom_up(&reachable.postorder, &mut first_error);
                (changed, self.republish_snapshot(reachable.preorder))
            }
        };

        state.waves += 1;
        let snapshot = self.snapshot.load_full();
        let entries = snapshot
            .ordered
            .iter()
            .map(|slot| NodeReport::from_slot(slot))
            .collect();
        let report = Arc::new(Report::new(state.waves, entries));
        self.report.store(Arc::clone(&report));
        self.completed_waves.store(state.waves, Ordering::Release);

        let publish = !matches!(wave, Wave::Initial)
            && !state
                .last_published
                .as_ref()
                .is_some_and(|previous| previous.same_content(&report));
        if publish {
            state.last_published = Some(Arc::clone(&report));
        }
        let topology = topology.filter(|_| !matches!(wave, Wave::Initial));

        debug!(
            graph = %self.id,
            wave = state.waves,
            kind = wave.label(),
            changed = changed.len(),
            nodes = snapshot.ordered.len(),
            published = publish,
            "wave complete"
        );

        let dispatch = self.dispatch.lock().map_err(|_| lock_err("graph dispatch"))?;
        drop(state);
        if publish {
            self.status_changed.publish(&report);
        }
        if let Some(change) = topology {
            self.topology_changed.publish(&change);
        }
        drop(dispatch);

        if matches!(wave, Wave::RefreshAll) {
            self.notify_other_graphs(&changed);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Re-runs checks leaves-first, then catches up ancestors outside the index.
    fn refresh_bottom_up(&self, postorder: &[Arc<NodeSlot>], first_error: &mut Option<GraphError>) -> Vec<NodeId> {
        let mut changed = Vec::new();
        for slot in postorder {
            if let Err(err) = slot.run_check() {
                warn!(graph = %self.id, node = %slot.name, error = %err, "intrinsic check failed");
                first_error.get_or_insert(err);
            }
            if slot.reaggregate(&self.arena) {
                changed.push(slot.id);
            }
        }

        let indexed: HashSet<NodeId> = postorder.iter().map(|slot| slot.id).collect();
        for slot in walk::upward_order(&self.arena, &changed) {
            if !indexed.contains(&slot.id) && slot.reaggregate(&self.arena) {
                changed.push(slot.id);
            }
        }
        changed
    }

    /// Swaps in the snapshot for `ordered` and moves hooks accordingly.
    fn republish_snapshot(&self, ordered: Vec<Arc<NodeSlot>>) -> Option<TopologyChange> {
        let next = Snapshot::new(ordered);
        let previous = self.snapshot.load_full();

        let added: Vec<Arc<NodeSlot>> = next
            .ordered
            .iter()
            .filter(|slot| !previous.members.contains(&slot.id))
            .cloned()
            .collect();
        let removed: Vec<Arc<NodeSlot>> = previous
            .ordered
            .iter()
            .filter(|slot| !next.members.contains(&slot.id))
            .cloned()
            .collect();

        let hook: Weak<dyn PropagationHook> = self.me.clone();
        for slot in &added {
            slot.attach(self.id, hook.clone());
        }
        for slot in &removed {
            slot.detach(self.id);
        }
        self.snapshot.store(Arc::new(next));

        if added.is_empty() && removed.is_empty() {
            return None;
        }
        Some(TopologyChange {
            added: added.into_iter().map(|slot| self.handle(slot)).collect(),
            removed: removed.into_iter().map(|slot| self.handle(slot)).collect(),
        })
    }

    /// Lets other graphs sharing changed nodes re-aggregate their ancestors.
    fn notify_other_graphs(&self, changed: &[NodeId]) {
        let mut targets: HashMap<GraphId, (Arc<dyn PropagationHook>, Vec<NodeId>)> = HashMap::new();
        for id in changed {
            let Some(slot) = self.arena.slot(*id) else {
                continue;
            };
            for (graph, hook) in slot.hooks(Some(self.id)) {
                targets.entry(graph).or_insert_with(|| (hook, Vec::new())).1.push(*id);
            }
        }

        for (graph, (hook, origins)) in targets {
            if let Err(err) = hook.propagate(&origins) {
                warn!(graph = %self.id, other = %graph, error = %err, "failed to notify sharing graph");
            }
        }
    }

    fn handle(&self, slot: Arc<NodeSlot>) -> Node {
        Node::from_slot(slot, Arc::clone(&self.arena))
    }
}

impl PropagationHook for GraphInner {
    fn propagate(&self, origins: &[NodeId]) -> GraphResult<()> {
        self.run_wave(Wave::Propagate(origins)).map(|_| ())
    }
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        for slot in &self.snapshot.load().ordered {
            slot.detach(self.id);
        }
    }
}

/// Materialized view over every node reachable from a set of roots.
///
/// Cloning yields another handle to the same graph. Dropping the last handle
/// detaches the graph from its nodes and disconnects its streams.
///
/// # Examples
///
/// ```
/// use healthgraph::{Graph, HealthEvaluation, HealthRegistry, HealthStatus, Importance};
///
/// let registry = HealthRegistry::new();
/// let store = registry.aggregation_node("store").unwrap();
/// let reviews = registry.check_node("reviews", || HealthEvaluation::unhealthy("down")).unwrap();
/// store.depends_on(&reviews, Importance::Optional).unwrap();
///
/// let graph = Graph::new(&[store]).unwrap();
/// let report = graph.create_report();
/// assert_eq!(report.get("store").unwrap().status, HealthStatus::Healthy);
/// assert_eq!(report.get("reviews").unwrap().status, HealthStatus::Unhealthy);
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    /// Materializes a graph over `roots` with the default configuration.
    pub fn new(roots: &[Node]) -> GraphResult<Self> {
        Self::with_config(roots, GraphConfig::default())
    }

    /// Materializes a graph over `roots`.
    ///
    /// Runs one full bottom-up refresh before returning, so the cached report
    /// is complete.
    ///
    /// # Errors
    ///
    /// `ValidationError::NoRoots` for an empty root list,
    /// `TopologyError::ForeignNode` if roots come from different registries and
    /// `GraphError::CheckFailed` if an intrinsic check fails during the
    /// initial refresh.
    pub fn with_config(roots: &[Node], config: GraphConfig) -> GraphResult<Self> {
        let Some(first) = roots.first() else {
            return Err(ValidationError::NoRoots.into());
        };
        if let Some(foreign) = roots.iter().find(|root| !root.same_registry(first)) {
            return Err(TopologyError::ForeignNode {
                name: foreign.name().to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        let root_ids: Vec<NodeId> = roots
            .iter()
            .map(Node::id)
            .filter(|id| seen.insert(*id))
            .collect();

        let arena = Arc::clone(first.arena());
        let inner = Arc::new_cyclic(|me| GraphInner {
            id: GraphId::new(),
            me: me.clone(),
            arena,
            roots: root_ids,
            status_changed: Broadcaster::new("status_changed", config.stream_capacity),
            topology_changed: Broadcaster::new("topology_changed", config.stream_capacity),
            config,
            wave: Mutex::new(WaveState::default()),
            dispatch: Mutex::new(()),
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            report: ArcSwap::from_pointee(Report::new(0, Vec::new())),
            completed_waves: AtomicU64::new(0),
        });

        let graph = Self { inner };
        graph.inner.run_wave(Wave::Initial)?;
        info!(
            graph = %graph.id(),
            roots = graph.inner.roots.len(),
            nodes = graph.len(),
            "graph materialized"
        );
        Ok(graph)
    }

    /// The graph's id.
    #[must_use]
    pub fn id(&self) -> GraphId {
        self.inner.id
    }

    /// The configuration the graph was built with.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    /// Root nodes, in construction order.
    #[must_use]
    pub fn roots(&self) -> Vec<Node> {
        self.inner
            .roots
            .iter()
            .filter_map(|id| self.inner.arena.slot(*id))
            .map(|slot| self.inner.handle(slot))
            .collect()
    }

    /// Every indexed node, in discovery order.
    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        self.inner
            .snapshot
            .load()
            .ordered
            .iter()
            .map(|slot| self.inner.handle(Arc::clone(slot)))
            .collect()
    }

    /// Number of indexed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.snapshot.load().ordered.len()
    }

    /// Returns true if no node is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up an indexed node by name.
    ///
    /// # Errors
    ///
    /// `LookupError::NodeNotFound` if no indexed node has that name.
    pub fn node(&self, name: &str) -> GraphResult<Node> {
        self.find_node(name).ok_or_else(|| {
            GraphError::from(LookupError::NodeNotFound {
                name: name.to_string(),
            })
        })
    }

    /// Looks up an indexed node by name, tolerating absence.
    #[must_use]
    pub fn find_node(&self, name: &str) -> Option<Node> {
        let snapshot = self.inner.snapshot.load();
        let index = *snapshot.by_name.get(name)?;
        snapshot
            .ordered
            .get(index)
            .map(|slot| self.inner.handle(Arc::clone(slot)))
    }

    /// Returns true if `node` is currently indexed.
    #[must_use]
    pub fn contains(&self, node: &Node) -> bool {
        Arc::ptr_eq(node.arena(), &self.inner.arena)
            && self.inner.snapshot.load().members.contains(&node.id())
    }

    /// The cached report of the last completed wave.
    #[must_use]
    pub fn create_report(&self) -> Arc<Report> {
        self.inner.report.load_full()
    }

    /// Hierarchy-preserving view of the current evaluations.
    ///
    /// Built under the wave lock so it reflects one complete wave.
    pub fn create_tree_snapshot(&self) -> GraphResult<TreeSnapshot> {
        let state = self.inner.wave.lock().map_err(|_| lock_err("graph wave"))?;
        let roots: Vec<Arc<NodeSlot>> = self
            .inner
            .roots
            .iter()
            .filter_map(|id| self.inner.arena.slot(*id))
            .collect();
        Ok(report::build_tree(&self.inner.arena, state.waves, &roots))
    }

    /// Re-runs every indexed node's check and re-aggregates bottom-up in one
    /// wave.
    ///
    /// # Errors
    ///
    /// The first `GraphError::CheckFailed` of the wave. The wave still
    /// completes and its report is published; failing nodes keep their previous
    /// intrinsic evaluation.
    #[instrument(skip(self), fields(graph = %self.id()))]
    pub fn refresh_all(&self) -> GraphResult<Arc<Report>> {
        self.inner.run_wave(Wave::RefreshAll)
    }

    /// Number of completed waves, including the construction wave.
    #[must_use]
    pub fn wave_count(&self) -> u64 {
        self.inner.completed_waves.load(Ordering::Acquire)
    }

    /// Subscribes to reports whose content differs from the last published one.
    #[must_use]
    pub fn status_changed(&self) -> Subscription<Arc<Report>> {
        self.inner.status_changed.subscribe()
    }

    /// Subscribes to index membership changes.
    #[must_use]
    pub fn topology_changed(&self) -> Subscription<TopologyChange> {
        self.inner.topology_changed.subscribe()
    }

    /// Events dropped because a subscriber's buffer was full.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.inner.status_changed.dropped() + self.inner.topology_changed.dropped()
    }

    /// Every cycle among indexed nodes as an ordered name list that repeats
    /// its first name at the end.
    #[must_use]
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let snapshot = self.inner.snapshot.load_full();
        cycles::detect_cycles(&self.inner.arena, &snapshot.ordered)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id())
            .field("roots", &self.inner.roots)
            .field("nodes", &self.len())
            .field("waves", &self.wave_count())
            .finish()
    }
}
