use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use healthgraph::{
    Graph, HealthEvaluation, HealthRegistry, HealthStatus, Importance, Node, NodeReport, Report,
    StatusChange,
};

/// A check node whose status can be switched from the test.
struct Switch {
    node: Node,
    state: Arc<AtomicU8>,
}

impl Switch {
    fn new(registry: &HealthRegistry, name: &str, status: HealthStatus) -> Self {
        let state = Arc::new(AtomicU8::new(encode(status)));
        let reading = Arc::clone(&state);
        let reason = format!("{name} probe failed");
        let node = registry
            .check_node(name, move || match decode(reading.load(Ordering::SeqCst)) {
                HealthStatus::Healthy => HealthEvaluation::healthy(),
                status => HealthEvaluation::new(status, Some(reason.clone())),
            })
            .unwrap();
        Self { node, state }
    }

    fn set(&self, status: HealthStatus) {
        self.state.store(encode(status), Ordering::SeqCst);
        self.node.refresh().unwrap();
    }
}

fn encode(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Healthy => 0,
        HealthStatus::Unknown => 1,
        HealthStatus::Degraded => 2,
        HealthStatus::Unhealthy => 3,
    }
}

fn decode(raw: u8) -> HealthStatus {
    match raw {
        0 => HealthStatus::Healthy,
        1 => HealthStatus::Unknown,
        2 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

fn status_of(graph: &Graph, name: &str) -> HealthStatus {
    graph.create_report().get(name).unwrap().status
}

#[test]
fn required_dependency_cascades_to_the_root() {
    let registry = HealthRegistry::new();
    let payment = Switch::new(&registry, "payment", HealthStatus::Unhealthy);
    let checkout = registry.aggregation_node("checkout").unwrap();
    let store = registry.aggregation_node("store").unwrap();
    checkout.depends_on(&payment.node, Importance::Required).unwrap();
    store.depends_on(&checkout, Importance::Required).unwrap();

    let graph = Graph::new(&[store.clone()]).unwrap();

    assert_eq!(status_of(&graph, "store"), HealthStatus::Unhealthy);
    assert_eq!(
        graph.create_report().get("store").unwrap().reason.as_deref(),
        Some("checkout: payment: payment probe failed")
    );

    payment.set(HealthStatus::Healthy);
    assert_eq!(status_of(&graph, "store"), HealthStatus::Healthy);
    assert_eq!(store.status(), HealthStatus::Healthy);
}

#[test]
fn important_dependency_only_degrades() {
    let registry = HealthRegistry::new();
    let fraud = Switch::new(&registry, "fraud", HealthStatus::Healthy);
    let checkout = registry.aggregation_node("checkout").unwrap();
    checkout.depends_on(&fraud.node, Importance::Important).unwrap();
    let graph = Graph::new(&[checkout]).unwrap();

    fraud.set(HealthStatus::Unhealthy);

    assert_eq!(status_of(&graph, "fraud"), HealthStatus::Unhealthy);
    assert_eq!(status_of(&graph, "checkout"), HealthStatus::Degraded);
}

#[test]
fn optional_dependency_is_ignored() {
    let registry = HealthRegistry::new();
    let reviews = Switch::new(&registry, "reviews", HealthStatus::Healthy);
    let store = registry.aggregation_node("store").unwrap();
    store.depends_on(&reviews.node, Importance::Optional).unwrap();
    let graph = Graph::new(&[store]).unwrap();

    reviews.set(HealthStatus::Unhealthy);

    assert_eq!(status_of(&graph, "reviews"), HealthStatus::Unhealthy);
    assert_eq!(status_of(&graph, "store"), HealthStatus::Healthy);
}

#[test]
fn resilient_dependencies_cover_for_each_other() {
    let registry = HealthRegistry::new();
    let primary = Switch::new(&registry, "primary", HealthStatus::Healthy);
    let replica = Switch::new(&registry, "replica", HealthStatus::Healthy);
    let app = registry.aggregation_node("app").unwrap();
    app.depends_on(&primary.node, Importance::Resilient)
        .unwrap()
        .depends_on(&replica.node, Importance::Resilient)
        .unwrap();
    let graph = Graph::new(&[app]).unwrap();

    primary.set(HealthStatus::Unhealthy);
    assert_eq!(status_of(&graph, "app"), HealthStatus::Degraded);

    replica.set(HealthStatus::Unhealthy);
    assert_eq!(status_of(&graph, "app"), HealthStatus::Unhealthy);

    primary.set(HealthStatus::Healthy);
    assert_eq!(status_of(&graph, "app"), HealthStatus::Degraded);
}

#[test]
fn diff_reports_appearance_and_change() {
    let entry = |name: &str, status| NodeReport {
        name: name.to_string(),
        status,
        reason: None,
        dependency_count: 0,
    };
    let a = Report::new(1, vec![entry("X", HealthStatus::Healthy)]);
    let b = Report::new(
        2,
        vec![entry("X", HealthStatus::Unhealthy), entry("Y", HealthStatus::Healthy)],
    );

    let changes: Vec<(String, HealthStatus, HealthStatus)> = Report::diff(&a, &b)
        .into_iter()
        .map(|StatusChange { name, previous, current, .. }| (name, previous, current))
        .collect();

    assert_eq!(
        changes,
        vec![
            ("X".to_string(), HealthStatus::Healthy, HealthStatus::Unhealthy),
            ("Y".to_string(), HealthStatus::Unknown, HealthStatus::Healthy),
        ]
    );
}

#[test]
fn diamond_is_reported_and_aggregated_once_per_wave() {
    let registry = HealthRegistry::new();
    let a = registry.aggregation_node("A").unwrap();
    let b = registry.aggregation_node("B").unwrap();
    let c = registry.aggregation_node("C").unwrap();
    let d = Switch::new(&registry, "D", HealthStatus::Healthy);
    a.depends_on(&b, Importance::Required).unwrap();
    a.depends_on(&c, Importance::Required).unwrap();
    b.depends_on(&d.node, Importance::Required).unwrap();
    c.depends_on(&d.node, Importance::Required).unwrap();
    let graph = Graph::new(&[a.clone()]).unwrap();

    let report = graph.create_report();
    assert_eq!(report.iter().filter(|entry| entry.name == "D").count(), 1);
    assert_eq!(report.len(), 4);

    let before = [&a, &b, &c, &d.node].map(Node::evaluation_count);
    d.set(HealthStatus::Unhealthy);
    let after = [&a, &b, &c, &d.node].map(Node::evaluation_count);
    for (before, after) in before.iter().zip(after) {
        assert_eq!(after - before, 1);
    }
    assert_eq!(status_of(&graph, "A"), HealthStatus::Unhealthy);

    let before = [&a, &b, &c, &d.node].map(Node::evaluation_count);
    graph.refresh_all().unwrap();
    let after = [&a, &b, &c, &d.node].map(Node::evaluation_count);
    for (before, after) in before.iter().zip(after) {
        assert_eq!(after - before, 1);
    }
}

#[test]
fn cycle_evaluates_without_recursing_and_is_detected() {
    let registry = HealthRegistry::new();
    let a = registry.aggregation_node("A").unwrap();
    let b = Switch::new(&registry, "B", HealthStatus::Healthy);
    a.depends_on(&b.node, Importance::Required).unwrap();
    b.node.depends_on(&a, Importance::Required).unwrap();
    let graph = Graph::new(&[a.clone()]).unwrap();

    b.set(HealthStatus::Degraded);
    graph.refresh_all().unwrap();

    assert_eq!(status_of(&graph, "A"), HealthStatus::Degraded);
    assert_eq!(status_of(&graph, "B"), HealthStatus::Degraded);

    let cycles = graph.detect_cycles();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].contains(&"A".to_string()));
    assert!(cycles[0].contains(&"B".to_string()));
}

#[test]
fn cycle_without_root_member_is_detected() {
    let registry = HealthRegistry::new();
    let root = registry.aggregation_node("root").unwrap();
    let x = registry.aggregation_node("x").unwrap();
    let y = registry.aggregation_node("y").unwrap();
    root.depends_on(&x, Importance::Required).unwrap();
    x.depends_on(&y, Importance::Required).unwrap();
    y.depends_on(&x, Importance::Required).unwrap();

    let graph = Graph::new(&[root]).unwrap();
    assert_eq!(graph.detect_cycles(), vec![vec!["x", "y", "x"]]);
}

#[test]
fn acyclic_graph_has_no_cycles() {
    let registry = HealthRegistry::new();
    let root = registry.aggregation_node("root").unwrap();
    let leaf = registry.healthy_node("leaf").unwrap();
    root.depends_on(&leaf, Importance::Required).unwrap();
    let graph = Graph::new(&[root]).unwrap();
    assert!(graph.detect_cycles().is_empty());
}

#[test]
fn removing_an_edge_restores_previous_state() {
    let registry = HealthRegistry::new();
    let api = Switch::new(&registry, "api", HealthStatus::Degraded);
    let db = Switch::new(&registry, "db", HealthStatus::Unhealthy);
    let cache = registry.healthy_node("cache").unwrap();
    api.node.depends_on(&cache, Importance::Required).unwrap();
    let graph = Graph::new(&[api.node.clone()]).unwrap();

    let evaluation = api.node.evaluation();
    let dependencies = api.node.dependencies();
    let report = graph.create_report();

    api.node.depends_on(&db.node, Importance::Required).unwrap();
    assert_eq!(api.node.status(), HealthStatus::Unhealthy);
    assert_eq!(db.node.parents(), vec![api.node.clone()]);

    assert!(api.node.remove_dependency(&db.node).unwrap());
    assert_eq!(api.node.evaluation(), evaluation);
    assert_eq!(api.node.dependencies(), dependencies);
    assert!(db.node.parents().is_empty());
    assert!(!db.node.has_parents());
    assert!(graph.create_report().same_content(&report));
}

#[test]
fn repeated_refresh_all_notifies_once() {
    let registry = HealthRegistry::new();
    let root = registry.aggregation_node("root").unwrap();
    let leaf = Switch::new(&registry, "leaf", HealthStatus::Degraded);
    root.depends_on(&leaf.node, Importance::Required).unwrap();
    let graph = Graph::new(&[root]).unwrap();
    let status = graph.status_changed();

    let first = graph.refresh_all().unwrap();
    let second = graph.refresh_all().unwrap();

    assert!(first.same_content(&second));
    assert_ne!(first.wave, second.wave);
    assert!(status.recv_timeout(Duration::from_secs(1)).is_ok());
    assert!(status.try_recv().is_none());
}

#[test]
fn silent_check_change_is_picked_up_by_refresh_all() {
    let registry = HealthRegistry::new();
    let root = registry.aggregation_node("root").unwrap();
    let leaf = Switch::new(&registry, "leaf", HealthStatus::Healthy);
    root.depends_on(&leaf.node, Importance::Required).unwrap();
    let graph = Graph::new(&[root]).unwrap();
    let status = graph.status_changed();
    graph.refresh_all().unwrap();
    status.drain();

    // No refresh on the node itself: only the graph-wide refresh sees it.
    leaf.state.store(encode(HealthStatus::Unhealthy), Ordering::SeqCst);
    assert_eq!(status_of(&graph, "root"), HealthStatus::Healthy);

    graph.refresh_all().unwrap();
    let report = status.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(report.get("root").unwrap().status, HealthStatus::Unhealthy);

    let previous = graph.create_report();
    leaf.set(HealthStatus::Healthy);
    let next = graph.create_report();
    let changes = Report::diff(&previous, &next);
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|change| change.current == HealthStatus::Healthy));
}

#[test]
fn tree_snapshot_preserves_hierarchy() {
    let registry = HealthRegistry::new();
    let store = registry.aggregation_node("store").unwrap();
    let checkout = registry.aggregation_node("checkout").unwrap();
    let search = registry.aggregation_node("search").unwrap();
    let db = Switch::new(&registry, "db", HealthStatus::Unhealthy);
    store.depends_on(&checkout, Importance::Required).unwrap();
    store.depends_on(&search, Importance::Important).unwrap();
    checkout.depends_on(&db.node, Importance::Required).unwrap();
    search.depends_on(&db.node, Importance::Required).unwrap();
    let graph = Graph::new(&[store]).unwrap();

    let tree = graph.create_tree_snapshot().unwrap();
    let root = tree.root_nodes().next().unwrap();
    assert_eq!(root.name, "store");
    assert_eq!(root.status, HealthStatus::Unhealthy);
    let children: Vec<_> = tree.children(root).collect();
    let names: Vec<&str> = children.iter().map(|node| node.name.as_str()).collect();
    assert_eq!(names, vec!["checkout", "search"]);
    assert_eq!(children[1].status, HealthStatus::Unhealthy);
    assert_eq!(tree.children(children[1]).next().unwrap().name, "db");
    assert_eq!(tree.children(children[0]).next().unwrap().name, "db");
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.wave, graph.wave_count());
}

#[test]
fn report_follows_discovery_order() {
    let registry = HealthRegistry::new();
    let web = registry.aggregation_node("web").unwrap();
    let admin = registry.aggregation_node("admin").unwrap();
    let db = registry.healthy_node("db").unwrap();
    web.depends_on(&db, Importance::Required).unwrap();
    admin.depends_on(&db, Importance::Required).unwrap();

    let graph = Graph::new(&[web, admin]).unwrap();
    let names: Vec<String> = graph.create_report().iter().map(|entry| entry.name.clone()).collect();
    assert_eq!(names, vec!["web", "db", "admin"]);
}

#[test]
fn deep_chain_tree_snapshot_does_not_overflow() {
    const DEPTH: usize = 10_000;

    let registry = HealthRegistry::new();
    let chain: Vec<Node> = (0..DEPTH)
        .map(|i| registry.aggregation_node(format!("n{i}")).unwrap())
        .collect();
    // Linked leaf-first so each new edge has no ancestors to walk yet.
    for i in (0..DEPTH - 1).rev() {
        chain[i].depends_on(&chain[i + 1], Importance::Required).unwrap();
    }

    let graph = Graph::new(&[chain[0].clone()]).unwrap();
    assert_eq!(graph.create_report().len(), DEPTH);
    assert!(graph.detect_cycles().is_empty());

    let tree = graph.create_tree_snapshot().unwrap();
    assert_eq!(tree.len(), DEPTH);
    let mut depth = 1;
    let mut current = tree.root_nodes().next().unwrap();
    while let Some(next) = tree.children(current).next() {
        assert_eq!(next.importance, Some(Importance::Required));
        current = next;
        depth += 1;
    }
    assert_eq!(depth, DEPTH);
    assert_eq!(current.name, format!("n{}", DEPTH - 1));

    let copy = tree.clone();
    assert_eq!(copy, tree);
    drop(copy);
    drop(tree);
}
