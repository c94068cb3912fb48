//! Shared helpers for tidemark behavior tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::json;
use tidemark_core::{
    schema_for, ExtractFuture, HealthFuture, HealthStatus, NaturalKey, SourceAdapter, SourceError,
    SourceId, SourceRecord, SourceSchema, UtcDateTime, Warehouse, WarehouseConfig, Watermark,
};
use tidemark_pipeline::{Layer, ModelDefinition, Node, NodeId, TaskGraph};

pub fn temp_warehouse(dir: &tempfile::TempDir) -> Warehouse {
    Warehouse::open(WarehouseConfig {
        tidemark_home: dir.path().to_path_buf(),
        db_path: dir.path().join("warehouse.duckdb"),
        max_pool_size: 2,
    })
    .expect("warehouse open")
}

pub fn node_id(name: &str) -> NodeId {
    NodeId::parse(name).expect("valid node id")
}

pub fn watermark(value: &str) -> Watermark {
    Watermark::parse(value).expect("valid watermark")
}

/// Daily price record extracted at that session's 21:00 UTC close.
pub fn price_record(source: SourceId, ticker: &str, date: &str, close: f64) -> SourceRecord {
    let extracted_at =
        UtcDateTime::parse(format!("{date}T21:00:00Z").as_str()).expect("valid session close");
    SourceRecord::new(
        source,
        NaturalKey::parse(format!("{ticker}:{date}").as_str()).expect("valid key"),
        json!({
            "ticker": ticker,
            "trade_date": date,
            "open": close - 1.0,
            "high": close + 1.5,
            "low": close - 2.0,
            "close": close,
            "volume": 1_200_000,
        }),
        extracted_at,
    )
}

/// Adapter whose extraction outcomes are scripted per call. Once the script
/// is exhausted it keeps returning empty batches, i.e. "no new data".
pub struct ScriptedAdapter {
    source: SourceId,
    script: Mutex<VecDeque<Result<Vec<SourceRecord>, SourceError>>>,
}

impl ScriptedAdapter {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn then_batch(self, batch: Vec<SourceRecord>) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Ok(batch));
        self
    }

    pub fn then_error(self, error: SourceError) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Err(error));
        self
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn id(&self) -> SourceId {
        self.source
    }

    fn schema(&self) -> &'static SourceSchema {
        schema_for(self.source)
    }

    fn extract(&self, _since: Option<Watermark>) -> ExtractFuture<'_> {
        let next = self.script.lock().expect("script lock").pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Ok(Vec::new())) })
    }

    fn health(&self) -> HealthFuture<'_> {
        Box::pin(async move { HealthStatus::healthy(100) })
    }
}

pub fn silver_model(table: &str, bronze_table: &str) -> ModelDefinition {
    ModelDefinition::new(
        table,
        format!(
            "SELECT ticker, trade_date, open, high, low, close, volume, extracted_at FROM {bronze_table}"
        ),
    )
}

pub fn gold_model(table: &str, silver_table: &str) -> ModelDefinition {
    ModelDefinition::new(
        table,
        format!(
            "SELECT ticker, COUNT(*) AS sessions, AVG(close) AS avg_close FROM {silver_table} GROUP BY ticker"
        ),
    )
}

/// Bronze tiingo -> silver clean_stock_data -> gold stock_performance.
pub fn tiingo_chain_graph() -> TaskGraph {
    let mut graph = TaskGraph::new();
    graph
        .add_node(Node::extract(node_id("tiingo"), SourceId::Tiingo))
        .expect("extract node");
    graph
        .add_node(Node::transform(
            node_id("clean_stock_data"),
            Layer::Silver,
            vec![node_id("tiingo")],
            silver_model("clean_stock_data", "bronze_tiingo_prices"),
        ))
        .expect("silver node");
    graph
        .add_node(Node::transform(
            node_id("stock_performance"),
            Layer::Gold,
            vec![node_id("clean_stock_data")],
            gold_model("stock_performance", "clean_stock_data"),
        ))
        .expect("gold node");
    graph
}
