//! Durable watermark store.
//!
//! Watermarks are RFC3339 UTC strings keyed by `(scope, id)` and only ever
//! move forward; an attempt to write an equal or older value is a no-op.

use crate::landing::parse_rfc3339;
use crate::{escape_sql_string, AccessMode, Warehouse, WarehouseError};

/// Namespace for a stored watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkScope {
    /// High watermark of landed data per source.
    Source,
    /// Last materialized watermark per graph node.
    Node,
}

impl WatermarkScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Node => "node",
        }
    }
}

impl Warehouse {
    pub fn get_watermark(
        &self,
        scope: WatermarkScope,
        id: &str,
    ) -> Result<Option<String>, WarehouseError> {
        let connection = self.manager().acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT watermark FROM watermarks WHERE scope = '{scope}' AND id = '{id}'",
            scope = scope.as_str(),
            id = escape_sql_string(id),
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let mut rows = statement.query([])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(row.get(0)?))
    }

    /// Advance a watermark monotonically. Returns whether the stored value
    /// actually moved.
    pub fn advance_watermark(
        &self,
        scope: WatermarkScope,
        id: &str,
        candidate: &str,
    ) -> Result<bool, WarehouseError> {
        let candidate_at = parse_rfc3339(candidate)?;
        if let Some(stored) = self.get_watermark(scope, id)? {
            if parse_rfc3339(stored.as_str())? >= candidate_at {
                return Ok(false);
            }
        }

        let connection = self.manager().acquire(AccessMode::ReadWrite)?;
        let sql = format!(
            "INSERT OR REPLACE INTO watermarks (scope, id, watermark, updated_at) VALUES ('{scope}', '{id}', '{watermark}', CURRENT_TIMESTAMP)",
            scope = scope.as_str(),
            id = escape_sql_string(id),
            watermark = escape_sql_string(candidate),
        );
        connection.execute_batch(sql.as_str())?;
        Ok(true)
    }
}
