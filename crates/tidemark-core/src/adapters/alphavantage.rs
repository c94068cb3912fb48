use std::sync::Arc;

use serde_json::json;
use time::Duration;

use super::{natural_key_for, passes_watermark, session_close_on_or_before, ticker_seed};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, NoopHttpClient};
use crate::provider_policy::ProviderPolicy;
use crate::record::schema_for;
use crate::source_adapter::{
    ExtractFuture, HealthFuture, HealthState, HealthStatus, SourceAdapter, SourceError,
};
use crate::throttling::ThrottlingQueue;
use crate::{SourceId, SourceRecord, SourceSchema, UtcDateTime, Watermark};

/// Free-tier Alpha Vantage daily adjusted prices cap out at 100 data points.
const MAX_LOOKBACK_DAYS: usize = 100;

/// Deterministic Alpha Vantage daily price adapter.
#[derive(Clone)]
pub struct AlphaVantageAdapter {
    health_state: HealthState,
    rate_available: bool,
    score: u16,
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    circuit_breaker: Arc<CircuitBreaker>,
    throttle: ThrottlingQueue,
    catalog: Vec<String>,
    lookback_days: usize,
    anchor: Option<UtcDateTime>,
}

impl Default for AlphaVantageAdapter {
    fn default() -> Self {
        Self {
            health_state: HealthState::Healthy,
            rate_available: true,
            score: 70,
            http_client: Arc::new(NoopHttpClient),
            auth: HttpAuth::QueryParam {
                name: String::from("apikey"),
                value: std::env::var("TIDEMARK_ALPHAVANTAGE_API_KEY")
                    .unwrap_or_else(|_| String::from("demo")),
            },
            circuit_breaker: Arc::new(CircuitBreaker::default()),
            throttle: ThrottlingQueue::from_policy(&ProviderPolicy::alphavantage_default()),
            catalog: super::DEFAULT_CATALOG
                .iter()
                .map(|ticker| (*ticker).to_owned())
                .collect(),
            lookback_days: 5,
            anchor: None,
        }
    }
}

impl AlphaVantageAdapter {
    pub fn with_health(health_state: HealthState, rate_available: bool) -> Self {
        Self {
            health_state,
            rate_available,
            ..Self::default()
        }
    }

    pub fn with_http_client(http_client: Arc<dyn HttpClient>, auth: HttpAuth) -> Self {
        Self {
            http_client,
            auth,
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

    async fn execute_authenticated_call(&self, endpoint: &str) -> Result<(), SourceError> {
        if !self.circuit_breaker.allow_request() {
            return Err(SourceError::unavailable(
                "alphavantage circuit breaker is open; skipping upstream call",
            ));
        }

        if let Err(delay) = self.throttle.acquire() {
            return Err(SourceError::rate_limited(format!(
                "alphavantage request quota exhausted; retry in {}s",
                delay.as_secs()
            )));
        }
        self.throttle.complete_one();

        let request = HttpRequest::get(endpoint).with_auth(&self.auth);
        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            if error.retryable() {
                SourceError::unavailable(format!(
                    "alphavantage transport error: {}",
                    error.message()
                ))
            } else {
                SourceError::malformed_response(format!(
                    "alphavantage transport error: {}",
                    error.message()
                ))
            }
        })?;

        if !response.is_success() {
            self.circuit_breaker.record_failure();
            return Err(match response.status {
                401 | 403 => SourceError::bad_credentials(format!(
                    "alphavantage rejected credentials with status {}",
                    response.status
                )),
                429 => SourceError::rate_limited("alphavantage request quota exhausted"),
                status => SourceError::unavailable(format!(
                    "alphavantage upstream returned status {status}"
                )),
            });
        }

        self.circuit_breaker.record_success();
        Ok(())
    }
}

impl SourceAdapter for AlphaVantageAdapter {
    fn id(&self) -> SourceId {
        SourceId::Alphavantage
    }

    fn schema(&self) -> &'static SourceSchema {
        schema_for(SourceId::Alphavantage)
    }

    fn extract(&self, since: Option<Watermark>) -> ExtractFuture<'_> {
        Box::pin(async move {
            if self.catalog.is_empty() {
                return Err(SourceError::invalid_request(
                    "alphavantage extraction requires at least one ticker",
                ));
            }
            if self.lookback_days > MAX_LOOKBACK_DAYS {
                return Err(SourceError::invalid_request(format!(
                    "alphavantage compact window covers at most {MAX_LOOKBACK_DAYS} days"
                )));
            }

            self.execute_authenticated_call(
                "https://www.alphavantage.co/query?function=TIME_SERIES_DAILY",
            )
            .await?;

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
        Box::pin(async move {
            let mut state = self.health_state;
            let mut rate_available = self.rate_available;

            match self.circuit_breaker.state() {
                CircuitState::Closed => {}
                CircuitState::HalfOpen => {
                    if state == HealthState::Healthy {
                        state = HealthState::Degraded;
                    }
                }
                CircuitState::Open => {
                    state = HealthState::Unhealthy;
                    rate_available = false;
                }
            }

            HealthStatus::new(state, rate_available, self.score)
        })
    }
}

fn daily_price_record(ticker: &str, trade_date: &str, extracted_at: UtcDateTime) -> SourceRecord {
    let day = extracted_at.into_inner().date().to_julian_day() as u64;
    let seed = ticker_seed(ticker) ^ day.wrapping_mul(0x9E37_79B9_7F4A_7C15);

    // Alpha Vantage rounds slightly differently than the other feeds, so the
    // same (ticker, day) can disagree across sources.
    let base = 80.15 + (seed % 12_000) as f64 / 100.0;
    let payload = json!({
        "ticker": ticker,
        "trade_date": trade_date,
        "open": base - 0.30,
        "high": base + 1.20,
        "low": base - 1.35,
        "close": base + 0.45,
        "volume": 1_000_000 + (seed % 8_000_000) as i64,
    });

    SourceRecord::new(
        SourceId::Alphavantage,
        natural_key_for(ticker, trade_date),
        payload,
        extracted_at,
    )
}
