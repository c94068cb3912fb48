use serde_json::json;
use tidemark_core::Warehouse;

use crate::cli::StatusArgs;
use crate::commands::CommandResult;
use crate::error::CliError;

pub fn run(args: &StatusArgs) -> Result<CommandResult, CliError> {
    let warehouse = Warehouse::open_default()?;
    let runs = warehouse.recent_runs(args.limit)?;
    let empty = runs.is_empty();

    let mut result = CommandResult::ok(json!({ "runs": runs }));
    if empty {
        result = result.with_warning("no runs recorded yet");
    }
    Ok(result)
}
