use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] tidemark_core::ValidationError),

    #[error(transparent)]
    Graph(#[from] tidemark_pipeline::GraphError),

    #[error(transparent)]
    Pipeline(#[from] tidemark_pipeline::PipelineError),

    #[error(transparent)]
    Warehouse(#[from] tidemark_core::WarehouseError),

    #[error("run {run_id} failed before any node could be attempted")]
    RunFailed { run_id: String },

    #[error("strict mode failed: warnings={warning_count}, errors={error_count}")]
    StrictModeViolation {
        warning_count: usize,
        error_count: usize,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::RunFailed { .. } => 1,
            Self::Validation(_) | Self::Graph(_) => 2,
            Self::StrictModeViolation { .. } => 3,
            Self::Pipeline(_) | Self::Warehouse(_) | Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}
