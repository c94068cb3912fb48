//! Pipeline orchestration engine for tidemark.
//!
//! Resolves a DAG of extraction and transformation nodes, lands raw records
//! idempotently, and incrementally materializes downstream models when their
//! upstream watermarks advance.

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod resolver;
pub mod scheduler;

pub use context::{CancelFlag, RunContext};
pub use error::PipelineError;
pub use executor::{MaterializationResult, TransformExecutor, TransformationError};
pub use graph::{
    FreshnessPolicy, GraphError, Layer, ModelDefinition, Node, NodeId, NodeKind, TaskGraph,
};
pub use resolver::{compute_dirty_set, DirtySet, WatermarkSnapshot};
pub use scheduler::{run_pipeline, NodeStatus, RunRecord, RunState};
