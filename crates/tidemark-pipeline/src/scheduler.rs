//! Run controller: drives one end-to-end pipeline run.
//!
//! State machine per run:
//! `Pending -> Extracting -> Resolving -> Transforming ->
//! {Completed, CompletedWithErrors, Failed}`.
//!
//! Extraction across sources is parallel; transformation walks the dirty set
//! in topological order. Partial failure is a first-class outcome: a broken
//! source or model isolates to its node (and, for transformations, its
//! transitive dependents) without aborting unrelated branches. The RunRecord
//! is owned and mutated exclusively by this module; workers report back
//! through return values.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::timeout;

use tidemark_core::{
    LandingWriter, RunNodeRow, RunRow, SourceAdapter, SourceError, SourceId, SourceRecord,
    UtcDateTime, Warehouse, Watermark, WatermarkScope,
};

use crate::context::RunContext;
use crate::error::PipelineError;
use crate::executor::{TransformExecutor, TransformationError};
use crate::graph::{NodeId, NodeKind, TaskGraph};
use crate::resolver::{compute_dirty_set, WatermarkSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Extracting,
    Resolving,
    Transforming,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Resolving => "resolving",
            Self::Transforming => "transforming",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal_success(self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithErrors)
    }
}

/// Metadata for one orchestration run. Finalized (and persisted) at run end.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: UtcDateTime,
    pub ended_at: Option<UtcDateTime>,
    pub state: RunState,
    pub node_statuses: BTreeMap<NodeId, NodeStatus>,
    pub errors: BTreeMap<NodeId, String>,
}

impl RunRecord {
    fn new(run_id: String, graph: &TaskGraph) -> Self {
        Self {
            run_id,
            started_at: UtcDateTime::now(),
            ended_at: None,
            state: RunState::Pending,
            node_statuses: graph
                .nodes()
                .iter()
                .map(|node| (node.id.clone(), NodeStatus::Pending))
                .collect(),
            errors: BTreeMap::new(),
        }
    }

    pub fn status(&self, id: &NodeId) -> NodeStatus {
        self.node_statuses
            .get(id)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
            || self
                .node_statuses
                .values()
                .any(|status| matches!(status, NodeStatus::Failed | NodeStatus::Skipped))
    }

    fn set_status(&mut self, id: &NodeId, status: NodeStatus) {
        self.node_statuses.insert(id.clone(), status);
    }

    fn record_error(&mut self, id: &NodeId, status: NodeStatus, message: impl Into<String>) {
        self.set_status(id, status);
        self.errors.insert(id.clone(), message.into());
    }

    fn finalize(&mut self) {
        self.ended_at = Some(UtcDateTime::now());
        self.state = if self.has_errors() {
            RunState::CompletedWithErrors
        } else {
            RunState::Completed
        };
    }

    fn to_rows(&self) -> (RunRow, Vec<RunNodeRow>) {
        let run = RunRow {
            run_id: self.run_id.clone(),
            started_at: self.started_at.format_rfc3339(),
            ended_at: self.ended_at.map(UtcDateTime::format_rfc3339),
            state: self.state.as_str().to_owned(),
        };
        let nodes = self
            .node_statuses
            .iter()
            .map(|(id, status)| RunNodeRow {
                node_id: id.as_str().to_owned(),
                status: status.as_str().to_owned(),
                error: self.errors.get(id).cloned(),
            })
            .collect();
        (run, nodes)
    }
}

/// Drive one pipeline run end to end.
///
/// Graph validation errors abort before any extraction starts. An
/// infrastructure failure before any node is attempted finalizes the run as
/// `Failed`; after that point the run always reaches a `Completed*` state
/// unless run persistence itself fails.
pub async fn run_pipeline(
    graph: &TaskGraph,
    sources: &[Arc<dyn SourceAdapter>],
    ctx: &RunContext,
) -> Result<RunRecord, PipelineError> {
    graph.validate()?;

    let mut record = RunRecord::new(ctx.run_id.clone(), graph);
    let adapters: HashMap<SourceId, Arc<dyn SourceAdapter>> = sources
        .iter()
        .map(|adapter| (adapter.id(), Arc::clone(adapter)))
        .collect();

    let since_map = match load_since_map(graph, ctx) {
        Ok(map) => map,
        Err(error) => {
            // Warehouse unreachable before any node could be attempted.
            record.ended_at = Some(UtcDateTime::now());
            record.state = RunState::Failed;
            audit(&ctx.warehouse, &record.run_id, None, "run_failed", Some(error.to_string().as_str()));
            let (run, nodes) = record.to_rows();
            let _ = ctx.warehouse.record_run(&run, &nodes);
            return Ok(record);
        }
    };

    record.state = RunState::Extracting;
    audit(&ctx.warehouse, &record.run_id, None, "extracting", None);
    let accepted = extract_sources(graph, &adapters, &since_map, ctx, &mut record).await;

    record.state = RunState::Resolving;
    audit(&ctx.warehouse, &record.run_id, None, "resolving", None);
    let failed: BTreeSet<NodeId> = record
        .node_statuses
        .iter()
        .filter(|(_, status)| **status == NodeStatus::Failed)
        .map(|(id, _)| id.clone())
        .collect();
    let mut snapshot = build_snapshot(graph, ctx, accepted)?;
    let dirty = compute_dirty_set(graph, &snapshot, &failed)?;

    record.state = RunState::Transforming;
    audit(
        &ctx.warehouse,
        &record.run_id,
        None,
        "transforming",
        Some(format!("dirty={}", dirty.len()).as_str()),
    );
    transform_dirty_nodes(graph, &dirty, ctx, &mut record, &mut snapshot).await;

    record.finalize();
    audit(
        &ctx.warehouse,
        &record.run_id,
        None,
        "finalized",
        Some(record.state.as_str()),
    );
    let (run, nodes) = record.to_rows();
    ctx.warehouse.record_run(&run, &nodes)?;

    Ok(record)
}

fn load_since_map(
    graph: &TaskGraph,
    ctx: &RunContext,
) -> Result<BTreeMap<NodeId, Option<Watermark>>, PipelineError> {
    let mut map = BTreeMap::new();
    for node in graph.nodes() {
        let Some(source) = node.source else {
            continue;
        };

        let since = match ctx.since_override {
            Some(since) => Some(since),
            None => read_watermark(&ctx.warehouse, WatermarkScope::Source, source.as_str())?,
        };
        map.insert(node.id.clone(), since);
    }
    Ok(map)
}

async fn extract_sources(
    graph: &TaskGraph,
    adapters: &HashMap<SourceId, Arc<dyn SourceAdapter>>,
    since_map: &BTreeMap<NodeId, Option<Watermark>>,
    ctx: &RunContext,
    record: &mut RunRecord,
) -> BTreeMap<NodeId, usize> {
    let mut join_set = JoinSet::new();
    let mut task_nodes: HashMap<tokio::task::Id, NodeId> = HashMap::new();

    for node in graph.nodes() {
        if node.kind != NodeKind::Extract {
            continue;
        }
        let Some(source) = node.source else {
            continue;
        };

        let Some(adapter) = adapters.get(&source).map(Arc::clone) else {
            record.record_error(
                &node.id,
                NodeStatus::Failed,
                format!("no adapter registered for source '{source}'"),
            );
            continue;
        };

        record.set_status(&node.id, NodeStatus::Running);
        let since = since_map.get(&node.id).copied().flatten();
        let retry = ctx.retry.clone();
        let per_call_timeout = ctx.source_timeout;

        let handle = join_set.spawn(async move {
            let mut attempt = 0_u32;
            loop {
                let outcome = match timeout(per_call_timeout, adapter.extract(since)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::timeout(format!(
                        "extraction exceeded {}ms",
                        per_call_timeout.as_millis()
                    ))),
                };

                match outcome {
                    Ok(batch) => return Ok(batch),
                    Err(error) if error.is_transient() && retry.allows_retry(attempt) => {
                        tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                        attempt += 1;
                    }
                    Err(error) => return Err(error),
                }
            }
        });
        task_nodes.insert(handle.id(), node.id.clone());
    }

    let writer = LandingWriter::new(ctx.warehouse.clone());
    let mut accepted = BTreeMap::new();

    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((task_id, outcome)) => {
                let node_id = task_nodes
                    .remove(&task_id)
                    .expect("every spawned task has a node");
                land_extraction(&writer, graph, &node_id, outcome, ctx, record, &mut accepted);
            }
            Err(join_error) => {
                if let Some(node_id) = task_nodes.remove(&join_error.id()) {
                    record.record_error(
                        &node_id,
                        NodeStatus::Failed,
                        format!("extraction task failed: {join_error}"),
                    );
                    audit(
                        &ctx.warehouse,
                        &record.run_id,
                        Some(node_id.as_str()),
                        "extract_failed",
                        Some("task panicked"),
                    );
                }
            }
        }
    }

    accepted
}

fn land_extraction(
    writer: &LandingWriter,
    graph: &TaskGraph,
    node_id: &NodeId,
    outcome: Result<Vec<SourceRecord>, SourceError>,
    ctx: &RunContext,
    record: &mut RunRecord,
    accepted: &mut BTreeMap<NodeId, usize>,
) {
    let batch = match outcome {
        Ok(batch) => batch,
        Err(error) => {
            record.record_error(node_id, NodeStatus::Failed, error.to_string());
            audit(
                &ctx.warehouse,
                &record.run_id,
                Some(node_id.as_str()),
                "extract_failed",
                Some(error.code()),
            );
            return;
        }
    };

    let schema = graph
        .node(node_id)
        .and_then(|node| node.source)
        .map(tidemark_core::schema_for)
        .expect("extract node has a source");
    let rows: Vec<_> = batch.iter().map(SourceRecord::to_landing).collect();

    match writer.write(&schema.table, &rows) {
        Ok(result) => {
            record.set_status(node_id, NodeStatus::Succeeded);
            accepted.insert(node_id.clone(), result.accepted);
            audit(
                &ctx.warehouse,
                &record.run_id,
                Some(node_id.as_str()),
                "extracted",
                Some(
                    format!(
                        "accepted={} superseded={}",
                        result.accepted, result.superseded
                    )
                    .as_str(),
                ),
            );
        }
        Err(error) => {
            record.record_error(node_id, NodeStatus::Failed, error.to_string());
            audit(
                &ctx.warehouse,
                &record.run_id,
                Some(node_id.as_str()),
                "landing_failed",
                Some(error.to_string().as_str()),
            );
        }
    }
}

fn build_snapshot(
    graph: &TaskGraph,
    ctx: &RunContext,
    accepted_this_run: BTreeMap<NodeId, usize>,
) -> Result<WatermarkSnapshot, PipelineError> {
    let mut snapshot = WatermarkSnapshot {
        accepted_this_run,
        ..WatermarkSnapshot::default()
    };

    for node in graph.nodes() {
        match node.kind {
            NodeKind::Extract => {
                let Some(source) = node.source else {
                    continue;
                };
                if let Some(watermark) =
                    read_watermark(&ctx.warehouse, WatermarkScope::Source, source.as_str())?
                {
                    snapshot.source_watermarks.insert(node.id.clone(), watermark);
                }
            }
            NodeKind::Transform => {
                if let Some(watermark) =
                    read_watermark(&ctx.warehouse, WatermarkScope::Node, node.id.as_str())?
                {
                    snapshot.node_watermarks.insert(node.id.clone(), watermark);
                }
            }
        }
    }

    Ok(snapshot)
}

async fn transform_dirty_nodes(
    graph: &TaskGraph,
    dirty: &crate::resolver::DirtySet,
    ctx: &RunContext,
    record: &mut RunRecord,
    snapshot: &mut WatermarkSnapshot,
) {
    let executor = TransformExecutor::new(ctx.warehouse.clone());

    let order = match graph.topological_order() {
        Ok(order) => order,
        Err(_) => return, // validate() already ran; unreachable in practice
    };

    for id in order {
        if !dirty.contains(&id) {
            continue;
        }
        let node = graph
            .node(&id)
            .expect("topological order only yields known nodes");
        if node.kind != NodeKind::Transform {
            continue;
        }

        // A node marked skipped by an upstream failure stays skipped.
        if record.status(&id) == NodeStatus::Skipped {
            continue;
        }

        // Cooperative cancellation checkpoint between node executions.
        if ctx.is_cancelled() {
            record.record_error(&id, NodeStatus::Skipped, "run cancelled");
            audit(
                &ctx.warehouse,
                &record.run_id,
                Some(id.as_str()),
                "cancelled",
                None,
            );
            continue;
        }

        record.set_status(&id, NodeStatus::Running);
        let input_watermark = snapshot.input_watermark(graph, &id);
        let task_executor = executor.clone();
        let task_node = node.clone();
        let handle =
            tokio::task::spawn_blocking(move || task_executor.materialize(&task_node, input_watermark));

        let outcome = match timeout(ctx.model_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(TransformationError::new(
                id.clone(),
                format!("materialization task failed: {join_error}"),
            )),
            Err(_) => Err(TransformationError::new(
                id.clone(),
                format!(
                    "materialization exceeded {}ms",
                    ctx.model_timeout.as_millis()
                ),
            )),
        };

        match outcome {
            Ok(result) => {
                record.set_status(&id, NodeStatus::Succeeded);
                if let Some(watermark) = result.watermark {
                    snapshot.node_watermarks.insert(id.clone(), watermark);
                }
                audit(
                    &ctx.warehouse,
                    &record.run_id,
                    Some(id.as_str()),
                    "materialized",
                    Some(result.target_table.as_str()),
                );
            }
            Err(error) => {
                record.record_error(&id, NodeStatus::Failed, error.to_string());
                audit(
                    &ctx.warehouse,
                    &record.run_id,
                    Some(id.as_str()),
                    "transform_failed",
                    Some(error.message.as_str()),
                );

                // Downstream nodes cannot safely materialize on stale or
                // missing input.
                for dependent in graph.transitive_dependents(&id) {
                    if record.status(&dependent) == NodeStatus::Pending {
                        record.record_error(
                            &dependent,
                            NodeStatus::Skipped,
                            format!("upstream transformation '{id}' failed"),
                        );
                    }
                }
            }
        }
    }
}

fn read_watermark(
    warehouse: &Warehouse,
    scope: WatermarkScope,
    id: &str,
) -> Result<Option<Watermark>, PipelineError> {
    let Some(stored) = warehouse.get_watermark(scope, id)? else {
        return Ok(None);
    };
    let watermark =
        Watermark::parse(stored.as_str()).map_err(|_| PipelineError::CorruptWatermark {
            id: id.to_owned(),
            value: stored,
        })?;
    Ok(Some(watermark))
}

/// Audit-log append. Failures here never change a run's outcome.
fn audit(warehouse: &Warehouse, run_id: &str, node: Option<&str>, event: &str, detail: Option<&str>) {
    let _ = warehouse.log_run_event(run_id, node, event, detail);
}
