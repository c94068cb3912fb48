//! Run metadata persistence and the per-node audit log.

use crate::{
    escape_sql_string, finalize_transaction, sql_option_text, AccessMode, Warehouse, WarehouseError,
};

/// One finalized orchestration run.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub state: String,
}

/// Terminal status of one node within a run.
#[derive(Debug, Clone)]
pub struct RunNodeRow {
    pub node_id: String,
    pub status: String,
    pub error: Option<String>,
}

/// Summary row for the `status` command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub state: String,
    pub nodes: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl Warehouse {
    /// Persist a finalized run with its per-node statuses in one transaction.
    pub fn record_run(&self, run: &RunRow, nodes: &[RunNodeRow]) -> Result<(), WarehouseError> {
        let connection = self.manager().acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            let sql = format!(
                "INSERT OR REPLACE INTO runs (run_id, started_at, ended_at, state) VALUES ('{run_id}', '{started_at}', {ended_at}, '{state}')",
                run_id = escape_sql_string(run.run_id.as_str()),
                started_at = escape_sql_string(run.started_at.as_str()),
                ended_at = sql_option_text(run.ended_at.as_deref()),
                state = escape_sql_string(run.state.as_str()),
            );
            connection.execute_batch(sql.as_str())?;

            for node in nodes {
                let sql = format!(
                    "INSERT OR REPLACE INTO run_nodes (run_id, node_id, status, error) VALUES ('{run_id}', '{node_id}', '{status}', {error})",
                    run_id = escape_sql_string(run.run_id.as_str()),
                    node_id = escape_sql_string(node.node_id.as_str()),
                    status = escape_sql_string(node.status.as_str()),
                    error = sql_option_text(node.error.as_deref()),
                );
                connection.execute_batch(sql.as_str())?;
            }

            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Append one event to the run audit log.
    pub fn log_run_event(
        &self,
        run_id: &str,
        node_id: Option<&str>,
        event: &str,
        detail: Option<&str>,
    ) -> Result<(), WarehouseError> {
        let connection = self.manager().acquire(AccessMode::ReadWrite)?;
        let sql = format!(
            "INSERT INTO run_log (run_id, node_id, event, detail, \"at\") VALUES ('{run_id}', {node_id}, '{event}', {detail}, CURRENT_TIMESTAMP)",
            run_id = escape_sql_string(run_id),
            node_id = sql_option_text(node_id),
            event = escape_sql_string(event),
            detail = sql_option_text(detail),
        );
        connection.execute_batch(sql.as_str())?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, WarehouseError> {
        let connection = self.manager().acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            r#"
SELECT
    r.run_id,
    r.started_at,
    r.ended_at,
    r.state,
    COUNT(n.node_id),
    COUNT(n.node_id) FILTER (WHERE n.status = 'failed'),
    COUNT(n.node_id) FILTER (WHERE n.status = 'skipped')
FROM runs r
LEFT JOIN run_nodes n ON n.run_id = r.run_id
GROUP BY r.run_id, r.started_at, r.ended_at, r.state
ORDER BY r.started_at DESC
LIMIT {limit}
"#,
            limit = limit.max(1),
        );

        let mut statement = connection.prepare(sql.as_str())?;
        let mut rows = statement.query([])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(RunSummary {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                ended_at: row.get(2)?,
                state: row.get(3)?,
                nodes: row.get(4)?,
                failed: row.get(5)?,
                skipped: row.get(6)?,
            });
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WarehouseConfig;
    use tempfile::tempdir;

    fn open_temp(dir: &tempfile::TempDir) -> Warehouse {
        Warehouse::open(WarehouseConfig {
            tidemark_home: dir.path().to_path_buf(),
            db_path: dir.path().join("warehouse.duckdb"),
            max_pool_size: 2,
        })
        .expect("warehouse open")
    }

    #[test]
    fn records_run_with_node_statuses() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);

        let run = RunRow {
            run_id: String::from("run-0001"),
            started_at: String::from("2024-01-04T06:00:00Z"),
            ended_at: Some(String::from("2024-01-04T06:00:09Z")),
            state: String::from("completed_with_errors"),
        };
        let nodes = vec![
            RunNodeRow {
                node_id: String::from("tiingo"),
                status: String::from("succeeded"),
                error: None,
            },
            RunNodeRow {
                node_id: String::from("clean_stock_data"),
                status: String::from("failed"),
                error: Some(String::from("relation missing")),
            },
            RunNodeRow {
                node_id: String::from("stock_performance"),
                status: String::from("skipped"),
                error: None,
            },
        ];
        warehouse.record_run(&run, &nodes).expect("record run");

        let summaries = warehouse.recent_runs(10).expect("summaries");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].run_id, "run-0001");
        assert_eq!(summaries[0].nodes, 3);
        assert_eq!(summaries[0].failed, 1);
        assert_eq!(summaries[0].skipped, 1);
    }

    #[test]
    fn recent_runs_orders_newest_first() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);

        for (run_id, started_at) in [
            ("run-0001", "2024-01-04T06:00:00Z"),
            ("run-0002", "2024-01-05T06:00:00Z"),
        ] {
            warehouse
                .record_run(
                    &RunRow {
                        run_id: run_id.to_owned(),
                        started_at: started_at.to_owned(),
                        ended_at: None,
                        state: String::from("completed"),
                    },
                    &[],
                )
                .expect("record run");
        }

        let summaries = warehouse.recent_runs(1).expect("summaries");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].run_id, "run-0002");
    }

    #[test]
    fn run_log_accepts_events_without_a_node() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(&temp);

        warehouse
            .log_run_event("run-0001", None, "extracting", None)
            .expect("phase event");
        warehouse
            .log_run_event("run-0001", Some("tiingo"), "extracted", Some("accepted=2"))
            .expect("node event");

        let query = warehouse
            .execute_query(
                "SELECT COUNT(*) FROM run_log WHERE run_id = 'run-0001'",
                crate::QueryGuardrails::default(),
                false,
            )
            .expect("count");
        assert_eq!(query.rows[0][0], serde_json::json!(2));
    }
}
