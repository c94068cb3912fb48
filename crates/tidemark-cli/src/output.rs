use serde_json::Value;
use tidemark_core::Envelope;

use crate::cli::OutputFormat;
use crate::error::CliError;

pub fn render(
    envelope: &Envelope<Value>,
    format: OutputFormat,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(envelope)?
            } else {
                serde_json::to_string(envelope)?
            };
            println!("{payload}");
        }
        OutputFormat::Text => render_text(envelope)?,
    }

    Ok(())
}

fn render_text(envelope: &Envelope<Value>) -> Result<(), CliError> {
    println!(
        "request {} ({}ms)",
        envelope.meta.request_id, envelope.meta.latency_ms
    );
    if let Some(run_id) = &envelope.meta.run_id {
        println!("run {run_id}");
    }

    for warning in &envelope.meta.warnings {
        println!("warning: {warning}");
    }
    for error in &envelope.errors {
        match &error.node {
            Some(node) => println!("error[{node}]: {} ({})", error.message, error.code),
            None => println!("error: {} ({})", error.message, error.code),
        }
    }

    println!("{}", serde_json::to_string_pretty(&envelope.data)?);
    Ok(())
}
