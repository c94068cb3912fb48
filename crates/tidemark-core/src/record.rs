use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use tidemark_warehouse::{FieldKind, FieldSpec, LandingRecord, TableSchema};

use crate::{SourceId, UtcDateTime, ValidationError, Watermark};

const NATURAL_KEY_MAX_LEN: usize = 128;

/// Business-meaningful record identifier, e.g. `AAPL:2024-01-02`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if input.is_empty() {
            return Err(ValidationError::EmptyNaturalKey);
        }
        if input.len() > NATURAL_KEY_MAX_LEN {
            return Err(ValidationError::NaturalKeyTooLong {
                len: input.len(),
                max: NATURAL_KEY_MAX_LEN,
            });
        }
        for (index, ch) in input.char_indices() {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, ':' | '-' | '_' | '.');
            if !valid {
                return Err(ValidationError::NaturalKeyInvalidChar { ch, index });
            }
        }

        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for NaturalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for NaturalKey {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// One raw extracted unit. Immutable once created; later versions of the same
/// `(source_id, natural_key)` supersede it through the landing upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub source_id: SourceId,
    pub natural_key: NaturalKey,
    pub payload: Value,
    pub extracted_at: UtcDateTime,
    pub source_version: Option<u64>,
}

impl SourceRecord {
    pub fn new(
        source_id: SourceId,
        natural_key: NaturalKey,
        payload: Value,
        extracted_at: UtcDateTime,
    ) -> Self {
        Self {
            source_id,
            natural_key,
            payload,
            extracted_at,
            source_version: None,
        }
    }

    pub fn with_source_version(mut self, source_version: u64) -> Self {
        self.source_version = Some(source_version);
        self
    }

    pub fn watermark(&self) -> Watermark {
        Watermark::new(self.extracted_at)
    }

    pub fn to_landing(&self) -> LandingRecord {
        LandingRecord {
            source: self.source_id.as_str().to_owned(),
            natural_key: self.natural_key.as_str().to_owned(),
            payload: self.payload.clone(),
            extracted_at: self.extracted_at.format_rfc3339(),
            source_version: self.source_version.and_then(|v| i64::try_from(v).ok()),
        }
    }
}

/// Declared landing shape for one source: the bronze table plus the payload
/// fields the landing writer enforces.
#[derive(Debug, Clone, Copy)]
pub struct SourceSchema {
    pub source_id: SourceId,
    pub table: TableSchema,
}

const DAILY_PRICE_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "ticker",
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "trade_date",
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "open",
        kind: FieldKind::Double,
    },
    FieldSpec {
        name: "high",
        kind: FieldKind::Double,
    },
    FieldSpec {
        name: "low",
        kind: FieldKind::Double,
    },
    FieldSpec {
        name: "close",
        kind: FieldKind::Double,
    },
    FieldSpec {
        name: "volume",
        kind: FieldKind::BigInt,
    },
];

static TIINGO_PRICES: SourceSchema = SourceSchema {
    source_id: SourceId::Tiingo,
    table: TableSchema {
        table: "bronze_tiingo_prices",
        fields: DAILY_PRICE_FIELDS,
    },
};

static ALPHAVANTAGE_PRICES: SourceSchema = SourceSchema {
    source_id: SourceId::Alphavantage,
    table: TableSchema {
        table: "bronze_alphavantage_prices",
        fields: DAILY_PRICE_FIELDS,
    },
};

static YAHOO_PRICES: SourceSchema = SourceSchema {
    source_id: SourceId::Yahoo,
    table: TableSchema {
        table: "bronze_yahoo_prices",
        fields: DAILY_PRICE_FIELDS,
    },
};

pub fn schema_for(source_id: SourceId) -> &'static SourceSchema {
    match source_id {
        SourceId::Tiingo => &TIINGO_PRICES,
        SourceId::Alphavantage => &ALPHAVANTAGE_PRICES,
        SourceId::Yahoo => &YAHOO_PRICES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ticker_date_key() {
        let key = NaturalKey::parse("AAPL:2024-01-02").expect("must parse");
        assert_eq!(key.as_str(), "AAPL:2024-01-02");
    }

    #[test]
    fn rejects_empty_key() {
        let err = NaturalKey::parse("").expect_err("must fail");
        assert!(matches!(err, ValidationError::EmptyNaturalKey));
    }

    #[test]
    fn rejects_whitespace_in_key() {
        let err = NaturalKey::parse("AAPL 2024").expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::NaturalKeyInvalidChar { ch: ' ', index: 4 }
        ));
    }

    #[test]
    fn landing_conversion_preserves_key_and_timestamp() {
        let record = SourceRecord::new(
            SourceId::Tiingo,
            NaturalKey::parse("AAPL:2024-01-02").expect("key"),
            json!({ "close": 185.6 }),
            UtcDateTime::parse("2024-01-02T21:00:00Z").expect("timestamp"),
        )
        .with_source_version(3);

        let landing = record.to_landing();
        assert_eq!(landing.source, "tiingo");
        assert_eq!(landing.natural_key, "AAPL:2024-01-02");
        assert_eq!(landing.extracted_at, "2024-01-02T21:00:00Z");
        assert_eq!(landing.source_version, Some(3));
    }

    #[test]
    fn every_source_has_a_declared_schema() {
        for source in SourceId::ALL {
            let schema = schema_for(source);
            assert_eq!(schema.source_id, source);
            assert!(schema.table.table.starts_with("bronze_"));
            assert_eq!(schema.table.fields.len(), 7);
        }
    }
}
