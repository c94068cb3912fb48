//! Task graph model: typed nodes with declared dependencies, validated into
//! a DAG with a deterministic topological order.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tidemark_core::SourceId;

/// Unique node name: lowercase snake identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn parse(input: &str) -> Result<Self, GraphError> {
        if input.is_empty() {
            return Err(GraphError::EmptyNodeId);
        }
        let starts_with_letter = input
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_lowercase());
        if !starts_with_letter {
            return Err(GraphError::InvalidNodeId {
                id: input.to_owned(),
            });
        }
        for ch in input.chars() {
            if !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_') {
                return Err(GraphError::InvalidNodeId {
                    id: input.to_owned(),
                });
            }
        }

        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for NodeId {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Extract,
    Transform,
}

/// Medallion tier the node materializes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

/// When a node must be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessPolicy {
    /// Rebuild only when an upstream watermark advanced.
    OnUpstreamAdvance,
    /// Rebuild on every run regardless of upstream state.
    AlwaysRebuild,
}

/// Declarative model for a Transform node: the SELECT body materialized into
/// the node's own table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDefinition {
    pub target_table: String,
    pub body: String,
}

impl ModelDefinition {
    pub fn new(target_table: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            target_table: target_table.into(),
            body: body.into(),
        }
    }
}

/// One unit of work in the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub layer: Layer,
    pub dependencies: Vec<NodeId>,
    pub freshness: FreshnessPolicy,
    /// Provider backing an Extract node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceId>,
    /// Model definition for a Transform node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelDefinition>,
}

impl Node {
    /// Bronze extraction node landing one source's raw records.
    pub fn extract(id: NodeId, source: SourceId) -> Self {
        Self {
            id,
            kind: NodeKind::Extract,
            layer: Layer::Bronze,
            dependencies: Vec::new(),
            freshness: FreshnessPolicy::OnUpstreamAdvance,
            source: Some(source),
            model: None,
        }
    }

    /// Silver/gold transformation node materializing a model.
    pub fn transform(
        id: NodeId,
        layer: Layer,
        dependencies: Vec<NodeId>,
        model: ModelDefinition,
    ) -> Self {
        Self {
            id,
            kind: NodeKind::Transform,
            layer,
            dependencies,
            freshness: FreshnessPolicy::OnUpstreamAdvance,
            source: None,
            model: Some(model),
        }
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }
}

/// Graph construction and validation errors. All of these are configuration
/// bugs: fatal at startup, never runtime-recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node id cannot be empty")]
    EmptyNodeId,

    #[error("node id '{id}' must be a lowercase snake identifier")]
    InvalidNodeId { id: String },

    #[error("node '{id}' is already defined")]
    DuplicateNode { id: NodeId },

    #[error("node '{node}' depends on unknown node '{missing}'")]
    DanglingDependency { node: NodeId, missing: NodeId },

    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<NodeId> },

    #[error("transform node '{id}' must declare a model")]
    MissingModel { id: NodeId },

    #[error("transform node '{id}' must declare at least one dependency")]
    NoDependencies { id: NodeId },

    #[error("extract node '{id}' cannot declare dependencies")]
    ExtractWithDependencies { id: NodeId },
}

fn format_cycle(cycle: &[NodeId]) -> String {
    cycle
        .iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Pure DAG structure; declaration order is preserved and used to break ties
/// among independent nodes.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { id: node.id });
        }
        match node.kind {
            NodeKind::Extract => {
                if !node.dependencies.is_empty() {
                    return Err(GraphError::ExtractWithDependencies { id: node.id });
                }
            }
            NodeKind::Transform => {
                if node.model.is_none() {
                    return Err(GraphError::MissingModel { id: node.id });
                }
                if node.dependencies.is_empty() {
                    return Err(GraphError::NoDependencies { id: node.id });
                }
            }
        }

        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|position| &self.nodes[*position])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check all structural invariants: every dependency resolves and the
    /// graph is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for dependency in &node.dependencies {
                if !self.index.contains_key(dependency) {
                    return Err(GraphError::DanglingDependency {
                        node: node.id.clone(),
                        missing: dependency.clone(),
                    });
                }
            }
        }

        self.find_cycle()
    }

    /// Dependency-respecting order; ties among independent nodes break by
    /// declaration order.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        self.validate()?;

        let mut in_degree = vec![0_usize; self.nodes.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (position, node) in self.nodes.iter().enumerate() {
            for dependency in &node.dependencies {
                let parent = self.index[dependency];
                children[parent].push(position);
                in_degree[position] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(position, degree)| (*degree == 0).then_some(position))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(position) = ready.pop_first() {
            order.push(self.nodes[position].id.clone());
            for child in &children[position] {
                in_degree[*child] -= 1;
                if in_degree[*child] == 0 {
                    ready.insert(*child);
                }
            }
        }

        debug_assert_eq!(order.len(), self.nodes.len(), "validate() rules out cycles");
        Ok(order)
    }

    /// Direct dependents of a node.
    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.dependencies.contains(id))
            .map(|node| node.id.clone())
            .collect()
    }

    /// All nodes reachable downstream of `id`, excluding `id` itself.
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut reached = BTreeSet::new();
        let mut frontier = vec![id.clone()];
        while let Some(current) = frontier.pop() {
            for dependent in self.dependents(&current) {
                if reached.insert(dependent.clone()) {
                    frontier.push(dependent);
                }
            }
        }
        reached
    }

    fn find_cycle(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }

        fn visit(
            graph: &TaskGraph,
            position: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            marks[position] = Mark::InStack;
            stack.push(position);

            for dependency in &graph.nodes[position].dependencies {
                let parent = graph.index[dependency];
                match marks[parent] {
                    Mark::InStack => {
                        let start = stack
                            .iter()
                            .position(|entry| *entry == parent)
                            .expect("in-stack node is on the stack");
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(parent);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, parent, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }

            stack.pop();
            marks[position] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        for position in 0..self.nodes.len() {
            if marks[position] == Mark::Unvisited {
                if let Some(cycle) = visit(self, position, &mut marks, &mut stack) {
                    let cycle = cycle
                        .into_iter()
                        .map(|entry| self.nodes[entry].id.clone())
                        .collect();
                    return Err(GraphError::Cycle { cycle });
                }
            }
        }

        Ok(())
    }
}
