//! Integration tests for graph transformation: flatten and rank projection.
//!
//! The fixture mirrors a two-rank system of composite tiles:
//! - `Leaf`: library device with input/output/aux ports
//! - `Inner`: assembly expanding to one leaf
//! - `Top`: assembly expanding to a leaf (carrying the external ports) plus
//!   an `Inner` assembly hanging off the leaf's aux port

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use devgraph::backend::{emit, RecordingBackend};
use devgraph::{Device, DeviceClass, DeviceGraph, FlattenPolicy, GraphError, GraphResult, PortDescriptor};

// ============================================================================
// Fixture Classes
// ============================================================================

fn leaf_class() -> Arc<DeviceClass> {
    DeviceClass::library("Leaf", "test.Leaf")
        .with_port(PortDescriptor::single("input", "net").optional())
        .with_port(PortDescriptor::single("output", "net").optional())
        .with_port(PortDescriptor::single("aux", "net").optional())
        .build()
}

fn inner_class(leaf: Arc<DeviceClass>) -> Arc<DeviceClass> {
    let expander = move |dev: &Device, g: &mut DeviceGraph| -> GraphResult<()> {
        let x = Device::named(&leaf, dev.scoped_name("x"));
        g.link(dev.port("bus")?, x.port("input")?, None)?;
        Ok(())
    };
    DeviceClass::assembly("Inner", expander)
        .with_port(PortDescriptor::single("bus", "net").optional())
        .build()
}

fn top_class(leaf: Arc<DeviceClass>, inner: Arc<DeviceClass>) -> Arc<DeviceClass> {
    let expander = move |dev: &Device, g: &mut DeviceGraph| -> GraphResult<()> {
        let l = Device::named(&leaf, dev.scoped_name("l"));
        let a = Device::named(&inner, dev.scoped_name("a"));
        g.link(dev.port("input")?, l.port("input")?, None)?;
        g.link(dev.port("output")?, l.port("output")?, None)?;
        g.link(l.port("aux")?, a.port("bus")?, None)?;
        Ok(())
    };
    DeviceClass::assembly("Top", expander)
        .with_port(PortDescriptor::single("input", "net").optional())
        .with_port(PortDescriptor::single("output", "net").optional())
        .build()
}

/// Assembly whose expansion reintroduces its own class forever.
fn recursive_class() -> Arc<DeviceClass> {
    let slot: Arc<OnceLock<Arc<DeviceClass>>> = Arc::new(OnceLock::new());
    let captured = Arc::clone(&slot);
    let expander = move |dev: &Device, g: &mut DeviceGraph| -> GraphResult<()> {
        let class = captured.get().expect("initialized").clone();
        let next = Device::named(&class, dev.scoped_name("next"));
        g.link(dev.port("input")?, next.port("input")?, None)?;
        g.link(dev.port("output")?, next.port("output")?, None)?;
        Ok(())
    };
    let class = DeviceClass::assembly("Loop", expander)
        .with_port(PortDescriptor::single("input", "net").optional())
        .with_port(PortDescriptor::single("output", "net").optional())
        .build();
    slot.set(Arc::clone(&class)).ok();
    class
}

/// Two `Top` tiles cross-linked in both directions.
fn two_tile_graph() -> (DeviceGraph, Device, Device) {
    let leaf = leaf_class();
    let inner = inner_class(Arc::clone(&leaf));
    let top = top_class(leaf, inner);

    let top0 = Device::named(&top, "top0");
    let top1 = Device::named(&top, "top1");

    let mut graph = DeviceGraph::new();
    graph
        .link(top0.port("input").unwrap(), top1.port("output").unwrap(), None)
        .unwrap();
    graph
        .link(top1.port("input").unwrap(), top0.port("output").unwrap(), None)
        .unwrap();
    (graph, top0, top1)
}

fn device_names(graph: &DeviceGraph) -> BTreeSet<String> {
    graph.devices().map(|d| d.name()).collect()
}

fn link_endpoints(graph: &DeviceGraph) -> BTreeSet<(String, String)> {
    graph
        .links()
        .map(|l| {
            let (a, b) = (l.a.to_string(), l.b.to_string());
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        })
        .collect()
}

// ============================================================================
// Flatten
// ============================================================================

#[test]
fn full_flatten_leaves_only_libraries() {
    let (mut graph, _, _) = two_tile_graph();
    graph.flatten(FlattenPolicy::Full).unwrap();

    assert!(graph.devices().all(|d| !d.is_assembly()));
    assert_eq!(
        device_names(&graph),
        BTreeSet::from([
            "top0.l".to_string(),
            "top0.a.x".to_string(),
            "top1.l".to_string(),
            "top1.a.x".to_string(),
        ])
    );

    // two cross links plus one rewritten aux link per tile
    assert_eq!(graph.link_count(), 4);
    let endpoints = link_endpoints(&graph);
    assert!(endpoints.contains(&("top0.l.input".to_string(), "top1.l.output".to_string())));
    assert!(endpoints.contains(&("top0.a.x.input".to_string(), "top0.l.aux".to_string())));
}

#[test]
fn levels_policy_stops_at_boundary() {
    let (mut graph, _, _) = two_tile_graph();
    graph.flatten(FlattenPolicy::Levels(1)).unwrap();

    let assemblies: BTreeSet<String> = graph
        .devices()
        .filter(|d| d.is_assembly())
        .map(|d| d.name())
        .collect();
    assert_eq!(
        assemblies,
        BTreeSet::from(["top0.a".to_string(), "top1.a".to_string()])
    );
}

#[test]
fn name_policy_expands_one_subtree() {
    let (mut graph, _, _) = two_tile_graph();
    graph.flatten(FlattenPolicy::Name("top0".to_string())).unwrap();

    assert_eq!(
        device_names(&graph),
        BTreeSet::from([
            "top0.l".to_string(),
            "top0.a.x".to_string(),
            "top1".to_string(),
        ])
    );
    assert!(graph.device("top1").unwrap().is_assembly());
}

#[test]
fn name_and_rank_policies_agree() {
    let (mut by_name, _, _) = two_tile_graph();
    by_name.flatten(FlattenPolicy::Name("top0".to_string())).unwrap();

    let (mut by_rank, top0, top1) = two_tile_graph();
    top0.set_partition(0, 0);
    top1.set_partition(1, 0);
    by_rank.flatten(FlattenPolicy::Rank(0)).unwrap();

    assert_eq!(device_names(&by_name), device_names(&by_rank));
    assert_eq!(link_endpoints(&by_name), link_endpoints(&by_rank));
}

#[test]
fn expand_policy_is_transitive() {
    let (mut graph, top0, _) = two_tile_graph();
    graph.flatten(FlattenPolicy::Expand(vec![top0])).unwrap();

    // top0's expansion exposed top0.a, which is expanded in turn
    assert_eq!(
        device_names(&graph),
        BTreeSet::from([
            "top0.l".to_string(),
            "top0.a.x".to_string(),
            "top1".to_string(),
        ])
    );
}

#[test]
fn recursive_assembly_fails_flatten() {
    let class = recursive_class();
    let dev = Device::named(&class, "loop");

    let mut graph = DeviceGraph::new();
    graph
        .link(dev.port("input").unwrap(), dev.port("output").unwrap(), None)
        .unwrap();

    let err = graph.flatten(FlattenPolicy::Full).unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimit(_)));
}

// ============================================================================
// Rank Projection
// ============================================================================

#[test]
fn follow_links_keeps_off_rank_assembly_opaque() {
    let (graph, top0, top1) = two_tile_graph();
    top0.set_partition(0, 0);
    top1.set_partition(1, 0);

    let followed = graph.follow_links(0).unwrap();

    for dev in followed.devices() {
        if dev.is_assembly() {
            assert_eq!(dev.name(), "top1.a");
        } else {
            assert!(dev.library().is_some());
        }
    }
    assert_eq!(
        device_names(&followed),
        BTreeSet::from([
            "top0.l".to_string(),
            "top0.a.x".to_string(),
            "top1.l".to_string(),
            "top1.a".to_string(),
        ])
    );

    // the original graph is untouched
    assert_eq!(graph.device_count(), 2);
}

#[test]
fn follow_links_requires_partitions() {
    let (graph, top0, _) = two_tile_graph();
    top0.set_partition(0, 0);
    let err = graph.follow_links(0).unwrap_err();
    assert!(matches!(err, GraphError::MissingPartition(_)));
}

#[test]
fn follow_links_is_idempotent() {
    let (graph, top0, top1) = two_tile_graph();
    top0.set_partition(0, 0);
    top1.set_partition(1, 0);

    let once = graph.follow_links(0).unwrap();
    let twice = once.follow_links(0).unwrap();

    assert_eq!(device_names(&once), device_names(&twice));
    assert_eq!(link_endpoints(&once), link_endpoints(&twice));
}

#[test]
fn follow_links_drops_unreachable_devices() {
    let (mut graph, top0, top1) = two_tile_graph();
    top0.set_partition(0, 0);
    top1.set_partition(1, 0);

    // an isolated device on another rank, connected to nothing
    let stray = Device::named(&leaf_class(), "stray");
    stray.set_partition(2, 0);
    graph.add(&stray).unwrap();

    let followed = graph.follow_links(0).unwrap();
    assert!(followed.device("stray").is_none());
}

#[test]
fn follow_links_inherits_partitions() {
    let (graph, top0, top1) = two_tile_graph();
    top0.set_partition(0, 1);
    top1.set_partition(1, 0);

    let followed = graph.follow_links(0).unwrap();
    followed.check_partition().unwrap();
    let leaf = followed.device("top0.l").unwrap();
    assert_eq!(leaf.partition().unwrap().rank, 0);
    assert_eq!(leaf.partition().unwrap().thread, 1);
}

// ============================================================================
// End to End
// ============================================================================

#[test]
fn flatten_then_emit() {
    let (mut graph, _, _) = two_tile_graph();
    graph.flatten(FlattenPolicy::Full).unwrap();

    let mut backend = RecordingBackend::new();
    emit(&graph, &mut backend).unwrap();
    assert_eq!(backend.component_count(), 4);
    assert_eq!(backend.connection_count(), 4);
}

#[test]
fn emit_before_flatten_fails() {
    let (graph, _, _) = two_tile_graph();
    let mut backend = RecordingBackend::new();
    let err = emit(&graph, &mut backend).unwrap_err();
    assert!(matches!(err, GraphError::UnexpandedAssembly(_)));
}

#[test]
fn projected_graph_emits_per_rank() {
    let (graph, top0, top1) = two_tile_graph();
    top0.set_partition(0, 0);
    top1.set_partition(1, 0);

    let mut local = graph.follow_links(0).unwrap();
    // finish expanding the opaque remote assembly before emission
    local.flatten(FlattenPolicy::Full).unwrap();

    let mut backend = RecordingBackend::new();
    emit(&local, &mut backend).unwrap();
    assert_eq!(backend.component_count(), 4);
}
