use serde_json::json;
use tidemark_core::SourceId;
use tidemark_pipeline::NodeId;

use crate::commands::{run::default_graph, CommandResult};
use crate::error::CliError;

pub fn run() -> Result<CommandResult, CliError> {
    let graph = default_graph(&SourceId::ALL, false)?;
    graph.validate()?;
    let order = graph.topological_order()?;

    let nodes = graph
        .nodes()
        .iter()
        .map(|node| {
            json!({
                "id": node.id,
                "kind": node.kind,
                "layer": node.layer,
                "dependencies": node.dependencies,
                "freshness": node.freshness,
            })
        })
        .collect::<Vec<_>>();

    Ok(CommandResult::ok(json!({
        "nodes": nodes,
        "order": order.iter().map(NodeId::as_str).collect::<Vec<_>>(),
    })))
}
