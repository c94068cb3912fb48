use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_landing_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS bronze_tiingo_prices (
    source TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    ticker TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    payload TEXT NOT NULL,
    extracted_at TEXT NOT NULL,
    source_version BIGINT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(source, natural_key)
);

CREATE TABLE IF NOT EXISTS bronze_alphavantage_prices (
    source TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    ticker TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    payload TEXT NOT NULL,
    extracted_at TEXT NOT NULL,
    source_version BIGINT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(source, natural_key)
);

CREATE TABLE IF NOT EXISTS bronze_yahoo_prices (
    source TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    ticker TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    payload TEXT NOT NULL,
    extracted_at TEXT NOT NULL,
    source_version BIGINT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(source, natural_key)
);
"#,
    },
    Migration {
        version: "0002_pipeline_state",
        sql: r#"
CREATE TABLE IF NOT EXISTS watermarks (
    scope TEXT NOT NULL,
    id TEXT NOT NULL,
    watermark TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(scope, id)
);

CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_nodes (
    run_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    PRIMARY KEY(run_id, node_id)
);

CREATE TABLE IF NOT EXISTS run_log (
    run_id TEXT NOT NULL,
    node_id TEXT,
    event TEXT NOT NULL,
    detail TEXT,
    "at" TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0003_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_bronze_tiingo_ticker_date ON bronze_tiingo_prices(ticker, trade_date);
CREATE INDEX IF NOT EXISTS idx_bronze_alphavantage_ticker_date ON bronze_alphavantage_prices(ticker, trade_date);
CREATE INDEX IF NOT EXISTS idx_bronze_yahoo_ticker_date ON bronze_yahoo_prices(ticker, trade_date);
CREATE INDEX IF NOT EXISTS idx_run_nodes_node ON run_nodes(node_id);
CREATE INDEX IF NOT EXISTS idx_run_log_run ON run_log(run_id, "at");
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let query = format!(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = '{}'",
            escape_sql_string(migration.version)
        );
        let applied_count: i64 = connection.query_row(query.as_str(), [], |row| row.get(0))?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            let insert = format!(
                "INSERT INTO schema_migrations (version) VALUES ('{}')",
                escape_sql_string(migration.version)
            );
            connection.execute_batch(insert.as_str())?;
        }
    }

    Ok(())
}

fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}
