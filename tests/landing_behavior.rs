//! Behavior tests for the landing store: idempotent upserts, version
//! conflict resolution, and schema enforcement.

use serde_json::json;
use tempfile::tempdir;
use tidemark_core::{
    schema_for, LandingWriter, NaturalKey, QueryGuardrails, SourceId, SourceRecord, UtcDateTime,
    WarehouseError, WatermarkScope,
};
use tidemark_tests::{price_record, temp_warehouse};

fn landing_rows(records: &[SourceRecord]) -> Vec<tidemark_core::LandingRecord> {
    records.iter().map(SourceRecord::to_landing).collect()
}

#[test]
fn when_the_same_batch_lands_twice_table_state_is_unchanged() {
    // Given: a batch of two sessions for one ticker
    let temp = tempdir().expect("tempdir");
    let warehouse = temp_warehouse(&temp);
    let writer = LandingWriter::new(warehouse.clone());
    let schema = schema_for(SourceId::Tiingo);
    let batch = vec![
        price_record(SourceId::Tiingo, "AAPL", "2024-01-02", 185.6),
        price_record(SourceId::Tiingo, "AAPL", "2024-01-03", 184.2),
    ];

    // When: the batch lands twice
    let first = writer
        .write(&schema.table, &landing_rows(&batch))
        .expect("first write");
    let snapshot_after_first = warehouse
        .execute_query(
            "SELECT natural_key, close, extracted_at FROM bronze_tiingo_prices ORDER BY natural_key",
            QueryGuardrails::default(),
            false,
        )
        .expect("snapshot");
    let second = writer
        .write(&schema.table, &landing_rows(&batch))
        .expect("second write");
    let snapshot_after_second = warehouse
        .execute_query(
            "SELECT natural_key, close, extracted_at FROM bronze_tiingo_prices ORDER BY natural_key",
            QueryGuardrails::default(),
            false,
        )
        .expect("snapshot");

    // Then: the replay accepted nothing and the rows are identical
    assert_eq!(first.accepted, 2);
    assert_eq!(second.accepted, 0);
    assert_eq!(second.superseded, 0);
    assert_eq!(snapshot_after_first.rows, snapshot_after_second.rows);
}

#[test]
fn when_two_sources_report_the_same_key_each_lands_in_its_own_table() {
    // Given: tiingo and yahoo disagree about AAPL on the same day
    let temp = tempdir().expect("tempdir");
    let warehouse = temp_warehouse(&temp);
    let writer = LandingWriter::new(warehouse.clone());

    let tiingo = price_record(SourceId::Tiingo, "AAPL", "2024-01-02", 185.6);
    let yahoo = price_record(SourceId::Yahoo, "AAPL", "2024-01-02", 185.9);

    // When: both land
    writer
        .write(&schema_for(SourceId::Tiingo).table, &landing_rows(&[tiingo]))
        .expect("tiingo write");
    writer
        .write(&schema_for(SourceId::Yahoo).table, &landing_rows(&[yahoo]))
        .expect("yahoo write");

    // Then: bronze keeps both observations; merging is a silver-model
    // decision, not a landing decision
    for (table, close) in [
        ("bronze_tiingo_prices", 185.6),
        ("bronze_yahoo_prices", 185.9),
    ] {
        let query = warehouse
            .execute_query(
                format!("SELECT close FROM {table} WHERE natural_key = 'AAPL:2024-01-02'")
                    .as_str(),
                QueryGuardrails::default(),
                false,
            )
            .expect("query");
        assert_eq!(query.rows[0][0], serde_json::json!(close));
    }
}

#[test]
fn when_any_record_violates_the_schema_the_whole_batch_is_rejected() {
    // Given: one valid record and one missing its close price
    let temp = tempdir().expect("tempdir");
    let warehouse = temp_warehouse(&temp);
    let writer = LandingWriter::new(warehouse.clone());
    let schema = schema_for(SourceId::Tiingo);

    let valid = price_record(SourceId::Tiingo, "AAPL", "2024-01-02", 185.6);
    let invalid = SourceRecord::new(
        SourceId::Tiingo,
        NaturalKey::parse("AAPL:2024-01-03").expect("key"),
        json!({ "ticker": "AAPL", "trade_date": "2024-01-03" }),
        UtcDateTime::parse("2024-01-03T21:00:00Z").expect("timestamp"),
    );

    // When: the batch lands
    let error = writer
        .write(&schema.table, &landing_rows(&[valid, invalid]))
        .expect_err("must reject");

    // Then: nothing was written
    assert!(matches!(error, WarehouseError::SchemaMismatch { .. }));
    let query = warehouse
        .execute_query(
            "SELECT COUNT(*) FROM bronze_tiingo_prices",
            QueryGuardrails::default(),
            false,
        )
        .expect("count");
    assert_eq!(query.rows[0][0], serde_json::json!(0));
}

#[test]
fn stale_replays_do_not_move_the_source_watermark() {
    // Given: the source already landed data through 2024-01-03
    let temp = tempdir().expect("tempdir");
    let warehouse = temp_warehouse(&temp);
    let writer = LandingWriter::new(warehouse.clone());
    let schema = schema_for(SourceId::Tiingo);

    writer
        .write(
            &schema.table,
            &landing_rows(&[price_record(SourceId::Tiingo, "AAPL", "2024-01-03", 184.2)]),
        )
        .expect("current write");

    // When: an older extraction replays
    writer
        .write(
            &schema.table,
            &landing_rows(&[price_record(SourceId::Tiingo, "AAPL", "2024-01-02", 185.6)]),
        )
        .expect("older write");

    // Then: the high watermark reflects the newest accepted record overall.
    // The older record is a new key, so it is accepted, but the watermark
    // does not regress to its timestamp.
    let watermark = warehouse
        .get_watermark(WatermarkScope::Source, "tiingo")
        .expect("watermark");
    assert_eq!(watermark.as_deref(), Some("2024-01-03T21:00:00Z"));
}
