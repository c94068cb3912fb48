//! Structural properties of the task graph: topological ordering and cycle
//! rejection across graph shapes.

use tidemark_core::SourceId;
use tidemark_pipeline::{GraphError, Layer, ModelDefinition, Node, NodeId, TaskGraph};
use tidemark_tests::node_id;

fn model(table: &str) -> ModelDefinition {
    ModelDefinition::new(table, format!("SELECT 1 AS placeholder_{table}"))
}

fn transform(name: &str, dependencies: &[&str]) -> Node {
    Node::transform(
        node_id(name),
        Layer::Silver,
        dependencies.iter().map(|dep| node_id(dep)).collect(),
        model(name),
    )
}

#[test]
fn diamond_graph_orders_every_edge_before_its_dependent() {
    let mut graph = TaskGraph::new();
    graph
        .add_node(Node::extract(node_id("tiingo"), SourceId::Tiingo))
        .expect("root");
    graph
        .add_node(transform("left_branch", &["tiingo"]))
        .expect("left");
    graph
        .add_node(transform("right_branch", &["tiingo"]))
        .expect("right");
    graph
        .add_node(transform("merged", &["left_branch", "right_branch"]))
        .expect("merge");

    let order = graph.topological_order().expect("order");
    let position = |name: &str| {
        order
            .iter()
            .position(|id| id.as_str() == name)
            .expect("node present")
    };

    for node in graph.nodes() {
        for dependency in &node.dependencies {
            assert!(
                position(dependency.as_str()) < position(node.id.as_str()),
                "dependency {dependency} must precede {}",
                node.id
            );
        }
    }
}

#[test]
fn wide_graph_interleaves_by_declaration_order() {
    let mut graph = TaskGraph::new();
    graph
        .add_node(Node::extract(node_id("yahoo"), SourceId::Yahoo))
        .expect("yahoo");
    graph
        .add_node(Node::extract(node_id("tiingo"), SourceId::Tiingo))
        .expect("tiingo");
    graph
        .add_node(transform("from_tiingo", &["tiingo"]))
        .expect("from_tiingo");
    graph
        .add_node(transform("from_yahoo", &["yahoo"]))
        .expect("from_yahoo");

    let order = graph.topological_order().expect("order");
    let names: Vec<_> = order.iter().map(NodeId::as_str).collect();

    // Ready nodes drain in declaration order, deterministically.
    assert_eq!(names, vec!["yahoo", "tiingo", "from_tiingo", "from_yahoo"]);

    // Repeated calls never reorder.
    for _ in 0..5 {
        assert_eq!(graph.topological_order().expect("order"), order);
    }
}

#[test]
fn self_loop_is_reported_as_a_cycle() {
    let mut graph = TaskGraph::new();
    graph
        .add_node(transform("recursive", &["recursive"]))
        .expect("add");

    let error = graph.validate().expect_err("must fail");
    let GraphError::Cycle { cycle } = error else {
        panic!("expected cycle, got {error:?}");
    };
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.contains(&node_id("recursive")));
}

#[test]
fn three_node_cycle_is_listed_in_edge_order() {
    let mut graph = TaskGraph::new();
    graph.add_node(transform("a", &["c"])).expect("a");
    graph.add_node(transform("b", &["a"])).expect("b");
    graph.add_node(transform("c", &["b"])).expect("c");

    let error = graph.validate().expect_err("must fail");
    let GraphError::Cycle { cycle } = error else {
        panic!("expected cycle, got {error:?}");
    };
    assert_eq!(cycle.first(), cycle.last());
    assert_eq!(cycle.len(), 4, "three nodes plus the closing repeat");
    for name in ["a", "b", "c"] {
        assert!(cycle.contains(&node_id(name)));
    }
}

#[test]
fn cycle_hidden_behind_a_valid_prefix_is_still_found() {
    let mut graph = TaskGraph::new();
    graph
        .add_node(Node::extract(node_id("tiingo"), SourceId::Tiingo))
        .expect("root");
    graph
        .add_node(transform("clean", &["tiingo"]))
        .expect("clean");
    graph.add_node(transform("x", &["clean", "y"])).expect("x");
    graph.add_node(transform("y", &["x"])).expect("y");

    let error = graph.validate().expect_err("must fail");
    assert!(matches!(error, GraphError::Cycle { .. }));
}

#[test]
fn dangling_dependency_names_both_ends() {
    let mut graph = TaskGraph::new();
    graph
        .add_node(transform("clean", &["ghost_source"]))
        .expect("add");

    let error = graph.validate().expect_err("must fail");
    assert_eq!(
        error,
        GraphError::DanglingDependency {
            node: node_id("clean"),
            missing: node_id("ghost_source"),
        }
    );
}

#[test]
fn topological_order_also_validates() {
    let mut graph = TaskGraph::new();
    graph.add_node(transform("a", &["b"])).expect("a");
    graph.add_node(transform("b", &["a"])).expect("b");

    let error = graph.topological_order().expect_err("must fail");
    assert!(matches!(error, GraphError::Cycle { .. }));
}
