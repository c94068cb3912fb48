use thiserror::Error;
use tidemark_core::WarehouseError;

use crate::graph::GraphError;

/// Orchestration-level failures.
///
/// Graph errors are configuration bugs and abort before any extraction.
/// Warehouse errors here are infrastructure failures; per-node source and
/// transformation failures never surface through this type, they live in the
/// RunRecord instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("stored watermark for '{id}' is corrupt: '{value}'")]
    CorruptWatermark { id: String, value: String },
}
