use serde_json::json;
use tidemark_core::{ProviderPolicy, SourceId};

use crate::commands::{run::default_adapters, CommandResult};
use crate::error::CliError;

pub async fn run() -> Result<CommandResult, CliError> {
    let adapters = default_adapters(&SourceId::ALL);

    let mut rows = Vec::with_capacity(adapters.len());
    for adapter in &adapters {
        let health = adapter.health().await;
        let policy = ProviderPolicy::default_for(adapter.id());
        rows.push(json!({
            "id": adapter.id(),
            "table": adapter.schema().table.table,
            "health": health,
            "quota_limit": policy.quota_limit,
            "quota_window_secs": policy.quota_window.as_secs(),
            "max_concurrency": policy.max_concurrency,
        }));
    }

    Ok(CommandResult::ok(json!({ "sources": rows })))
}
