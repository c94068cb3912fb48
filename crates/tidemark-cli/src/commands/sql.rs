use serde_json::json;
use tidemark_core::{QueryGuardrails, Warehouse};

use crate::cli::SqlArgs;
use crate::commands::CommandResult;
use crate::error::CliError;

pub fn run(args: &SqlArgs) -> Result<CommandResult, CliError> {
    let warehouse = Warehouse::open_default()?;
    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };

    let result = warehouse.execute_query(args.query.as_str(), guardrails, args.write)?;
    let row_count = result.row_count;
    let truncated = result.truncated;

    let mut command_result = CommandResult::ok(json!({
        "columns": result.columns,
        "rows": result.rows,
        "row_count": row_count,
        "truncated": truncated,
    }));
    if truncated {
        command_result = command_result.with_warning(format!(
            "result truncated at {row_count} rows (use --max-rows to raise the limit)"
        ));
    }

    Ok(command_result)
}
