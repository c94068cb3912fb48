//! Dirty-set computation: which nodes must rebuild this run.
//!
//! One forward pass over the topological order, O(nodes + edges). An Extract
//! node is dirty exactly when its extraction accepted at least one record
//! this run. A Transform node is dirty when any dependency is dirty, when a
//! dependency watermark already exceeds its own last materialized watermark,
//! or when its freshness policy forces a rebuild. Nodes that failed earlier
//! in the run contribute neither dirtiness nor watermarks downstream.

use std::collections::{BTreeMap, BTreeSet};

use tidemark_core::Watermark;

use crate::graph::{FreshnessPolicy, GraphError, NodeId, NodeKind, TaskGraph};

/// Durable and run-scoped watermark state feeding the resolver.
#[derive(Debug, Clone, Default)]
pub struct WatermarkSnapshot {
    /// Accepted landing writes per Extract node for the current run.
    pub accepted_this_run: BTreeMap<NodeId, usize>,
    /// Source high watermark per Extract node.
    pub source_watermarks: BTreeMap<NodeId, Watermark>,
    /// `last_materialized_watermark` per Transform node.
    pub node_watermarks: BTreeMap<NodeId, Watermark>,
}

impl WatermarkSnapshot {
    /// The watermark a node currently embodies: landed high watermark for an
    /// Extract node, last materialized watermark for a Transform node.
    pub fn current_watermark(&self, graph: &TaskGraph, id: &NodeId) -> Option<Watermark> {
        let node = graph.node(id)?;
        match node.kind {
            NodeKind::Extract => self.source_watermarks.get(id).copied(),
            NodeKind::Transform => self.node_watermarks.get(id).copied(),
        }
    }

    /// Max watermark among a node's dependencies at this point of the run.
    pub fn input_watermark(&self, graph: &TaskGraph, id: &NodeId) -> Option<Watermark> {
        let node = graph.node(id)?;
        node.dependencies
            .iter()
            .filter_map(|dependency| self.current_watermark(graph, dependency))
            .max()
    }
}

/// Run-scoped set of nodes whose inputs changed, in topological order.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    ordered: Vec<NodeId>,
    members: BTreeSet<NodeId>,
}

impl DirtySet {
    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    fn insert(&mut self, id: NodeId) {
        if self.members.insert(id.clone()) {
            self.ordered.push(id);
        }
    }
}

pub fn compute_dirty_set(
    graph: &TaskGraph,
    snapshot: &WatermarkSnapshot,
    failed: &BTreeSet<NodeId>,
) -> Result<DirtySet, GraphError> {
    let order = graph.topological_order()?;
    let mut dirty = DirtySet::default();

    for id in order {
        if failed.contains(&id) {
            continue;
        }
        let node = graph
            .node(&id)
            .expect("topological order only yields known nodes");

        let is_dirty = match node.kind {
            NodeKind::Extract => snapshot
                .accepted_this_run
                .get(&id)
                .copied()
                .unwrap_or_default()
                > 0,
            NodeKind::Transform => {
                if node.freshness == FreshnessPolicy::AlwaysRebuild {
                    true
                } else {
                    let own = snapshot.node_watermarks.get(&id).copied();
                    node.dependencies.iter().any(|dependency| {
                        if failed.contains(dependency) {
                            return false;
                        }
                        if dirty.contains(dependency) {
                            return true;
                        }
                        match (snapshot.current_watermark(graph, dependency), own) {
                            (Some(upstream), Some(own)) => upstream > own,
                            (Some(_), None) => true,
                            (None, _) => false,
                        }
                    })
                }
            }
        };

        if is_dirty {
            dirty.insert(id);
        }
    }

    Ok(dirty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Layer, ModelDefinition, Node};
    use tidemark_core::SourceId;

    fn id(name: &str) -> NodeId {
        NodeId::parse(name).expect("valid node id")
    }

    fn watermark(value: &str) -> Watermark {
        Watermark::parse(value).expect("valid watermark")
    }

    fn model(table: &str) -> ModelDefinition {
        ModelDefinition::new(table, format!("SELECT 1 AS placeholder_{table}"))
    }

    fn chain_graph() -> TaskGraph {
        let mut graph = TaskGraph::new();
        graph
            .add_node(Node::extract(id("tiingo"), SourceId::Tiingo))
            .expect("extract");
        graph
            .add_node(Node::transform(
                id("clean_stock_data"),
                Layer::Silver,
                vec![id("tiingo")],
                model("clean_stock_data"),
            ))
            .expect("silver");
        graph
            .add_node(Node::transform(
                id("stock_performance"),
                Layer::Gold,
                vec![id("clean_stock_data")],
                model("stock_performance"),
            ))
            .expect("gold");
        graph
    }

    #[test]
    fn accepted_writes_dirty_the_whole_chain() {
        let graph = chain_graph();
        let mut snapshot = WatermarkSnapshot::default();
        snapshot.accepted_this_run.insert(id("tiingo"), 10);
        snapshot
            .source_watermarks
            .insert(id("tiingo"), watermark("2024-01-03T21:00:00Z"));

        let dirty =
            compute_dirty_set(&graph, &snapshot, &BTreeSet::new()).expect("dirty set");
        let names: Vec<_> = dirty.iter().map(NodeId::as_str).collect();
        assert_eq!(names, vec!["tiingo", "clean_stock_data", "stock_performance"]);
    }

    #[test]
    fn settled_watermarks_produce_an_empty_dirty_set() {
        let graph = chain_graph();
        let mut snapshot = WatermarkSnapshot::default();
        snapshot.accepted_this_run.insert(id("tiingo"), 0);
        snapshot
            .source_watermarks
            .insert(id("tiingo"), watermark("2024-01-03T21:00:00Z"));
        snapshot
            .node_watermarks
            .insert(id("clean_stock_data"), watermark("2024-01-03T21:00:00Z"));
        snapshot
            .node_watermarks
            .insert(id("stock_performance"), watermark("2024-01-03T21:00:00Z"));

        let dirty =
            compute_dirty_set(&graph, &snapshot, &BTreeSet::new()).expect("dirty set");
        assert!(dirty.is_empty());
    }

    #[test]
    fn stale_node_catches_up_without_new_extraction() {
        // The source advanced in an earlier run but the silver node never
        // materialized that advance; it must rebuild even though this run
        // accepted nothing.
        let graph = chain_graph();
        let mut snapshot = WatermarkSnapshot::default();
        snapshot.accepted_this_run.insert(id("tiingo"), 0);
        snapshot
            .source_watermarks
            .insert(id("tiingo"), watermark("2024-01-03T21:00:00Z"));
        snapshot
            .node_watermarks
            .insert(id("clean_stock_data"), watermark("2024-01-02T21:00:00Z"));
        snapshot
            .node_watermarks
            .insert(id("stock_performance"), watermark("2024-01-02T21:00:00Z"));

        let dirty =
            compute_dirty_set(&graph, &snapshot, &BTreeSet::new()).expect("dirty set");
        assert!(!dirty.contains(&id("tiingo")));
        assert!(dirty.contains(&id("clean_stock_data")));
        assert!(dirty.contains(&id("stock_performance")));
    }

    #[test]
    fn always_rebuild_ignores_watermarks() {
        let mut graph = TaskGraph::new();
        graph
            .add_node(Node::extract(id("tiingo"), SourceId::Tiingo))
            .expect("extract");
        graph
            .add_node(
                Node::transform(
                    id("clean_stock_data"),
                    Layer::Silver,
                    vec![id("tiingo")],
                    model("clean_stock_data"),
                )
                .with_freshness(FreshnessPolicy::AlwaysRebuild),
            )
            .expect("silver");

        let dirty = compute_dirty_set(&graph, &WatermarkSnapshot::default(), &BTreeSet::new())
            .expect("dirty set");
        assert!(dirty.contains(&id("clean_stock_data")));
    }

    #[test]
    fn failed_extract_does_not_propagate_dirtiness() {
        let graph = chain_graph();
        let mut snapshot = WatermarkSnapshot::default();
        snapshot.accepted_this_run.insert(id("tiingo"), 5);
        snapshot
            .source_watermarks
            .insert(id("tiingo"), watermark("2024-01-03T21:00:00Z"));

        let failed = BTreeSet::from([id("tiingo")]);
        let dirty = compute_dirty_set(&graph, &snapshot, &failed).expect("dirty set");
        assert!(dirty.is_empty());
    }
}
