use clap::{Args, Parser, Subcommand, ValueEnum};

/// Watermark-driven ELT pipeline runner.
#[derive(Debug, Parser)]
#[command(name = "tidemark", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Fail when the run produced warnings or per-node errors.
    #[arg(long, global = true)]
    pub strict: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute one end-to-end pipeline run.
    Run(RunArgs),
    /// Validate the task graph and print its execution order.
    Graph,
    /// List registered sources with health and quota policy.
    Sources,
    /// Show recent run history.
    Status(StatusArgs),
    /// Run a guarded ad-hoc query against the warehouse.
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Restrict extraction to these sources; defaults to all registered.
    #[arg(long = "source", value_name = "SOURCE")]
    pub sources: Vec<String>,

    /// Rebuild every transform node regardless of watermarks.
    #[arg(long)]
    pub full_refresh: bool,

    /// Extract records strictly newer than this RFC3339 watermark instead of
    /// each source's stored high watermark.
    #[arg(long, value_name = "RFC3339")]
    pub since: Option<String>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Number of runs to show, newest first.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// SQL to execute. Read-only unless --write is passed.
    pub query: String,

    /// Allow write statements.
    #[arg(long)]
    pub write: bool,

    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    /// Query timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
