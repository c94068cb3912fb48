//! Idempotent landing-store writer for raw source records.
//!
//! Upserts are keyed by `(source, natural_key)`. A record with a newer
//! `extracted_at` (or a higher `source_version` at the same timestamp)
//! replaces the stored row; an equal or older record is a no-op, so
//! replaying an extraction batch never changes the final table state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::watermarks::WatermarkScope;
use crate::{
    escape_sql_string, finalize_transaction, sql_option_i64, AccessMode, Warehouse, WarehouseError,
};

/// SQL type expected for one payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Double,
    BigInt,
    Boolean,
}

impl FieldKind {
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Double => "DOUBLE",
            Self::BigInt => "BIGINT",
            Self::Boolean => "BOOLEAN",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::Double => value.as_f64().is_some_and(f64::is_finite),
            Self::BigInt => value.as_i64().is_some(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// One required payload field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Declared payload shape for one landing table. Defined once per source and
/// enforced on every write; never inferred from records.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
}

impl TableSchema {
    pub fn check_payload(&self, payload: &Value) -> Result<(), WarehouseError> {
        let Some(object) = payload.as_object() else {
            return Err(WarehouseError::SchemaMismatch {
                table: self.table.to_owned(),
                detail: String::from("payload must be a JSON object"),
            });
        };

        for field in self.fields {
            let Some(value) = object.get(field.name) else {
                return Err(WarehouseError::SchemaMismatch {
                    table: self.table.to_owned(),
                    detail: format!("missing required field '{}'", field.name),
                });
            };
            if !field.kind.accepts(value) {
                return Err(WarehouseError::SchemaMismatch {
                    table: self.table.to_owned(),
                    detail: format!(
                        "field '{}' is not a valid {}",
                        field.name,
                        field.kind.sql_type()
                    ),
                });
            }
        }

        Ok(())
    }
}

/// One raw record ready to land.
#[derive(Debug, Clone)]
pub struct LandingRecord {
    pub source: String,
    pub natural_key: String,
    pub payload: Value,
    /// RFC3339 UTC extraction timestamp.
    pub extracted_at: String,
    pub source_version: Option<i64>,
}

/// Outcome of one landing batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Records written (new keys plus replacements of older versions).
    pub accepted: usize,
    /// Prior rows replaced by a newer version of the same key.
    pub superseded: usize,
}

/// Serializes landing writes per source and resolves version conflicts.
#[derive(Clone)]
pub struct LandingWriter {
    warehouse: Warehouse,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LandingWriter {
    pub fn new(warehouse: Warehouse) -> Self {
        Self {
            warehouse,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Land a batch of records for one source.
    ///
    /// Side effect: advances the source high watermark to the max
    /// `extracted_at` among accepted records.
    pub fn write(
        &self,
        schema: &TableSchema,
        records: &[LandingRecord],
    ) -> Result<WriteResult, WarehouseError> {
        if records.is_empty() {
            return Ok(WriteResult::default());
        }

        let source = records[0].source.as_str();
        let mut parsed = Vec::with_capacity(records.len());
        for record in records {
            if record.source != source {
                return Err(WarehouseError::QueryRejected(format!(
                    "landing batch mixes sources '{source}' and '{}'",
                    record.source
                )));
            }
            schema.check_payload(&record.payload)?;
            parsed.push(parse_rfc3339(record.extracted_at.as_str())?);
        }

        let lock = self.source_lock(source);
        let _guard = lock.lock().expect("landing source lock poisoned");

        let connection = self.warehouse.manager().acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(WriteResult, Option<String>), WarehouseError> {
            let mut outcome = WriteResult::default();
            let mut high_watermark: Option<(OffsetDateTime, String)> = None;

            for (record, extracted_at) in records.iter().zip(parsed.iter().copied()) {
                match stored_version(&connection, schema.table, record)? {
                    Some((stored_at, stored_version)) => {
                        let newer = extracted_at > stored_at
                            || (extracted_at == stored_at
                                && record.source_version > stored_version);
                        if !newer {
                            continue;
                        }
                        upsert_record(&connection, schema, record)?;
                        outcome.accepted += 1;
                        outcome.superseded += 1;
                    }
                    None => {
                        upsert_record(&connection, schema, record)?;
                        outcome.accepted += 1;
                    }
                }

                let advance = high_watermark
                    .as_ref()
                    .is_none_or(|(current, _)| extracted_at > *current);
                if advance {
                    high_watermark = Some((extracted_at, record.extracted_at.clone()));
                }
            }

            Ok((outcome, high_watermark.map(|(_, raw)| raw)))
        })();

        let (outcome, high_watermark) = finalize_transaction(&connection, result)?;
        drop(connection);

        if let Some(watermark) = high_watermark {
            self.warehouse
                .advance_watermark(WatermarkScope::Source, source, watermark.as_str())?;
        }

        Ok(outcome)
    }

    fn source_lock(&self, source: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("landing lock table poisoned");
        Arc::clone(locks.entry(source.to_owned()).or_default())
    }
}

fn stored_version(
    connection: &::duckdb::Connection,
    table: &str,
    record: &LandingRecord,
) -> Result<Option<(OffsetDateTime, Option<i64>)>, WarehouseError> {
    let sql = format!(
        "SELECT extracted_at, source_version FROM {table} WHERE source = '{source}' AND natural_key = '{key}'",
        source = escape_sql_string(record.source.as_str()),
        key = escape_sql_string(record.natural_key.as_str()),
    );
    let mut statement = connection.prepare(sql.as_str())?;
    let mut rows = statement.query([])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let extracted_at: String = row.get(0)?;
    let source_version: Option<i64> = row.get(1)?;
    Ok(Some((parse_rfc3339(extracted_at.as_str())?, source_version)))
}

fn upsert_record(
    connection: &::duckdb::Connection,
    schema: &TableSchema,
    record: &LandingRecord,
) -> Result<(), WarehouseError> {
    let mut columns = vec!["source", "natural_key"];
    let mut values = vec![
        format!("'{}'", escape_sql_string(record.source.as_str())),
        format!("'{}'", escape_sql_string(record.natural_key.as_str())),
    ];

    let object = record
        .payload
        .as_object()
        .expect("payload validated as object");
    for field in schema.fields {
        let value = object
            .get(field.name)
            .expect("payload validated against schema");
        columns.push(field.name);
        values.push(render_field(field.kind, value));
    }

    columns.extend(["payload", "extracted_at", "source_version", "ingested_at"]);
    values.push(format!(
        "'{}'",
        escape_sql_string(record.payload.to_string().as_str())
    ));
    values.push(format!(
        "'{}'",
        escape_sql_string(record.extracted_at.as_str())
    ));
    values.push(sql_option_i64(record.source_version));
    values.push(String::from("CURRENT_TIMESTAMP"));

    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({columns}) VALUES ({values})",
        table = schema.table,
        columns = columns.join(", "),
        values = values.join(", "),
    );
    connection.execute_batch(sql.as_str())?;
    Ok(())
}

fn render_field(kind: FieldKind, value: &Value) -> String {
    match kind {
        FieldKind::Text => format!(
            "'{}'",
            escape_sql_string(value.as_str().unwrap_or_default())
        ),
        FieldKind::Double => value.as_f64().unwrap_or_default().to_string(),
        FieldKind::BigInt => value.as_i64().unwrap_or_default().to_string(),
        FieldKind::Boolean => {
            if value.as_bool().unwrap_or_default() {
                String::from("TRUE")
            } else {
                String::from("FALSE")
            }
        }
    }
}

pub(crate) fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, WarehouseError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|_| WarehouseError::InvalidTimestamp {
        value: value.to_owned(),
    })
}
