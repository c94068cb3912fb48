use serde_json::json;
use time::Duration;

use super::{natural_key_for, passes_watermark, session_close_on_or_before, ticker_seed};
use crate::record::schema_for;
use crate::source_adapter::{
    ExtractFuture, HealthFuture, HealthState, HealthStatus, SourceAdapter, SourceError,
};
use crate::{SourceId, SourceRecord, SourceSchema, UtcDateTime, Watermark};

/// Deterministic Yahoo Finance daily price adapter. Unauthenticated, so there
/// is no transport or credential handling to guard.
#[derive(Debug, Clone)]
pub struct YahooAdapter {
    health_state: HealthState,
    rate_available: bool,
    score: u16,
    catalog: Vec<String>,
    lookback_days: usize,
    anchor: Option<UtcDateTime>,
}

impl Default for YahooAdapter {
    fn default() -> Self {
        Self {
            health_state: HealthState::Healthy,
            rate_available: true,
            score: 80,
            catalog: super::DEFAULT_CATALOG
                .iter()
                .map(|ticker| (*ticker).to_owned())
                .collect(),
            lookback_days: 5,
            anchor: None,
        }
    }
}

impl YahooAdapter {
    pub fn with_health(health_state: HealthState, rate_available: bool) -> Self {
        Self {
            health_state,
            rate_available,
            ..Self::default()
        }
    }

    pub fn with_anchor(mut self, anchor: UtcDateTime) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<String>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_lookback_days(mut self, lookback_days: usize) -> Self {
        self.lookback_days = lookback_days;
        self
    }
}

impl SourceAdapter for YahooAdapter {
    fn id(&self) -> SourceId {
        SourceId::Yahoo
    }

    fn schema(&self) -> &'static SourceSchema {
        schema_for(SourceId::Yahoo)
    }

    fn extract(&self, since: Option<Watermark>) -> ExtractFuture<'_> {
        Box::pin(async move {
            if self.catalog.is_empty() {
                return Err(SourceError::invalid_request(
                    "yahoo extraction requires at least one ticker",
                ));
            }
            if self.health_state == HealthState::Unhealthy {
                return Err(SourceError::unavailable(
                    "yahoo chart endpoint is unavailable",
                ));
            }
            if !self.rate_available {
                return Err(SourceError::rate_limited(
                    "yahoo chart endpoint throttled this client",
                ));
            }

            let latest_close = session_close_on_or_before(self.anchor.unwrap_or_else(UtcDateTime::now));
            let mut records = Vec::with_capacity(self.catalog.len() * self.lookback_days);

            for offset in (0..self.lookback_days).rev() {
                let extracted_at = latest_close.minus(Duration::days(offset as i64));
                let trade_date = extracted_at.into_inner().date().to_string();

                for ticker in &self.catalog {
                    let record = daily_price_record(ticker.as_str(), trade_date.as_str(), extracted_at);
                    if passes_watermark(&record, since) {
                        records.push(record);
                    }
                }
            }

            Ok(records)
        })
    }

    fn health(&self) -> HealthFuture<'_> {
        Box::pin(async move { HealthStatus::new(self.health_state, self.rate_available, self.score) })
    }
}

fn daily_price_record(ticker: &str, trade_date: &str, extracted_at: UtcDateTime) -> SourceRecord {
    let day = extracted_at.into_inner().date().to_julian_day() as u64;
    let seed = ticker_seed(ticker) ^ day.wrapping_mul(0x9E37_79B9_7F4A_7C15);

    let base = 79.9 + (seed % 12_000) as f64 / 100.0;
    let payload = json!({
        "ticker": ticker,
        "trade_date": trade_date,
        "open": base - 0.40,
        "high": base + 1.30,
        "low": base - 1.45,
        "close": base + 0.35,
        "volume": 1_000_000 + (seed % 8_000_000) as i64,
    });

    SourceRecord::new(
        SourceId::Yahoo,
        natural_key_for(ticker, trade_date),
        payload,
        extracted_at,
    )
}
