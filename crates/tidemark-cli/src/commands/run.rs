use std::str::FromStr;
use std::sync::Arc;

use tidemark_core::{
    AlphaVantageAdapter, EnvelopeError, SourceAdapter, SourceId, TiingoAdapter, Warehouse,
    Watermark, YahooAdapter,
};
use tidemark_pipeline::{
    run_pipeline, FreshnessPolicy, Layer, ModelDefinition, Node, NodeId, NodeStatus, RunContext,
    RunState, TaskGraph,
};

use crate::cli::RunArgs;
use crate::commands::CommandResult;
use crate::error::CliError;

pub async fn run(args: &RunArgs) -> Result<CommandResult, CliError> {
    let sources = selected_sources(&args.sources)?;
    let graph = default_graph(&sources, args.full_refresh)?;
    let adapters = default_adapters(&sources);

    let warehouse = Warehouse::open_default()?;
    let mut ctx = RunContext::new(warehouse);
    if let Some(since) = &args.since {
        ctx = ctx.with_since(Watermark::parse(since)?);
    }

    let record = run_pipeline(&graph, &adapters, &ctx).await?;
    if record.state == RunState::Failed {
        return Err(CliError::RunFailed {
            run_id: record.run_id,
        });
    }

    let mut errors = Vec::new();
    for (node, message) in &record.errors {
        let code = match record.status(node) {
            NodeStatus::Skipped => "pipeline.node_skipped",
            _ => "pipeline.node_failed",
        };
        errors.push(EnvelopeError::new(code, message.as_str())?.with_node(node.as_str()));
    }

    let run_id = record.run_id.clone();
    let state = record.state;
    let mut result = CommandResult::ok(serde_json::to_value(&record)?)
        .with_run_id(run_id)
        .with_errors(errors);
    if state == RunState::CompletedWithErrors {
        result = result.with_warning("run completed with errors; see per-node detail");
    }

    Ok(result)
}

pub fn selected_sources(requested: &[String]) -> Result<Vec<SourceId>, CliError> {
    if requested.is_empty() {
        return Ok(SourceId::ALL.to_vec());
    }

    let mut sources = Vec::with_capacity(requested.len());
    for value in requested {
        let source = SourceId::from_str(value)?;
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    Ok(sources)
}

pub fn default_adapters(sources: &[SourceId]) -> Vec<Arc<dyn SourceAdapter>> {
    sources
        .iter()
        .map(|source| -> Arc<dyn SourceAdapter> {
            match source {
                SourceId::Tiingo => Arc::new(TiingoAdapter::default()),
                SourceId::Alphavantage => Arc::new(AlphaVantageAdapter::default()),
                SourceId::Yahoo => Arc::new(YahooAdapter::default()),
            }
        })
        .collect()
}

/// Built-in pipeline: one bronze landing node per source, a silver cleaning
/// model, and a gold per-ticker performance model.
pub fn default_graph(sources: &[SourceId], full_refresh: bool) -> Result<TaskGraph, CliError> {
    let mut graph = TaskGraph::new();
    let mut bronze_ids = Vec::with_capacity(sources.len());

    for source in sources {
        let id = NodeId::parse(source.as_str())?;
        graph.add_node(Node::extract(id.clone(), *source))?;
        bronze_ids.push(id);
    }

    let freshness = if full_refresh {
        FreshnessPolicy::AlwaysRebuild
    } else {
        FreshnessPolicy::OnUpstreamAdvance
    };

    let silver_id = NodeId::parse("clean_stock_data")?;
    graph.add_node(
        Node::transform(
            silver_id.clone(),
            Layer::Silver,
            bronze_ids,
            ModelDefinition::new("clean_stock_data", clean_stock_data_body(sources)),
        )
        .with_freshness(freshness),
    )?;

    graph.add_node(
        Node::transform(
            NodeId::parse("stock_performance")?,
            Layer::Gold,
            vec![silver_id],
            ModelDefinition::new("stock_performance", STOCK_PERFORMANCE_BODY),
        )
        .with_freshness(freshness),
    )?;

    Ok(graph)
}

/// Latest extraction wins per (ticker, day) across the selected sources;
/// conflicting values from slower feeds are superseded, not merged.
fn clean_stock_data_body(sources: &[SourceId]) -> String {
    let unioned = sources
        .iter()
        .map(|source| {
            format!(
                "SELECT source, ticker, trade_date, open, high, low, close, volume, extracted_at FROM bronze_{source}_prices"
            )
        })
        .collect::<Vec<_>>()
        .join("\n    UNION ALL\n    ");

    format!(
        r#"WITH unioned AS (
    {unioned}
)
SELECT source, ticker, trade_date, open, high, low, close, volume, extracted_at
FROM (
    SELECT *,
           ROW_NUMBER() OVER (
               PARTITION BY ticker, trade_date
               ORDER BY extracted_at DESC, source
           ) AS version_rank
    FROM unioned
)
WHERE version_rank = 1"#
    )
}

const STOCK_PERFORMANCE_BODY: &str = r#"SELECT ticker,
       COUNT(*) AS sessions,
       MIN(trade_date) AS first_session,
       MAX(trade_date) AS last_session,
       arg_min(close, trade_date) AS first_close,
       arg_max(close, trade_date) AS last_close,
       arg_max(close, trade_date) / arg_min(close, trade_date) - 1.0 AS period_return,
       CAST(AVG(volume) AS BIGINT) AS avg_volume
FROM clean_stock_data
GROUP BY ticker"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_graph_is_valid_and_ordered() {
        let graph = default_graph(&SourceId::ALL, false).expect("graph");
        let order = graph.topological_order().expect("order");

        let names: Vec<_> = order.iter().map(NodeId::as_str).collect();
        assert_eq!(
            names,
            vec![
                "tiingo",
                "alphavantage",
                "yahoo",
                "clean_stock_data",
                "stock_performance"
            ]
        );
    }

    #[test]
    fn restricting_sources_shrinks_the_silver_union() {
        let body = clean_stock_data_body(&[SourceId::Tiingo]);
        assert!(body.contains("bronze_tiingo_prices"));
        assert!(!body.contains("bronze_yahoo_prices"));
    }

    #[test]
    fn unknown_source_is_a_usage_error() {
        let error = selected_sources(&[String::from("bloomberg")]).expect_err("must fail");
        assert!(matches!(error, CliError::Validation(_)));
    }
}
