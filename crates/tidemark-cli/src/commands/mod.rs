mod graph;
mod run;
mod sources;
mod sql;
mod status;

use std::time::Instant;

use serde_json::Value;
use tidemark_core::{Envelope, EnvelopeError, EnvelopeMeta};
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::error::CliError;

const SCHEMA_VERSION: &str = "v1.0.0";

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub run_id: Option<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            run_id: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let started = Instant::now();

    let command_result = match &cli.command {
        Command::Run(args) => run::run(args).await?,
        Command::Graph => graph::run()?,
        Command::Sources => sources::run().await?,
        Command::Status(args) => status::run(args)?,
        Command::Sql(args) => sql::run(args)?,
    };

    let mut meta = EnvelopeMeta::new(
        format!("req-{}", Uuid::new_v4()),
        SCHEMA_VERSION,
        elapsed_ms(started),
    )?;
    if let Some(run_id) = command_result.run_id {
        meta = meta.with_run_id(run_id);
    }
    for warning in command_result.warnings {
        meta.push_warning(warning);
    }

    Envelope::with_errors(meta, command_result.data, command_result.errors).map_err(CliError::from)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
