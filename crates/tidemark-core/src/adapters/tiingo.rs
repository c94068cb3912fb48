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

/// Deterministic Tiingo end-of-day price adapter.
#[derive(Clone)]
pub struct TiingoAdapter {
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

impl Default for TiingoAdapter {
    fn default() -> Self {
        Self {
            health_state: HealthState::Healthy,
            rate_available: true,
            score: 95,
            http_client: Arc::new(NoopHttpClient),
            auth: HttpAuth::Header {
                name: String::from("authorization"),
                value: format!(
                    "Token {}",
                    std::env::var("TIDEMARK_TIINGO_API_TOKEN")
                        .unwrap_or_else(|_| String::from("demo"))
                ),
            },
            circuit_breaker: Arc::new(CircuitBreaker::default()),
            throttle: ThrottlingQueue::from_policy(&ProviderPolicy::tiingo_default()),
            catalog: super::DEFAULT_CATALOG
                .iter()
                .map(|ticker| (*ticker).to_owned())
                .collect(),
            lookback_days: 5,
            anchor: None,
        }
    }
}

impl TiingoAdapter {
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

    pub fn with_circuit_breaker(circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            circuit_breaker,
            ..Self::default()
        }
    }

    /// Pin the extraction window to a fixed point in time.
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
                "tiingo circuit breaker is open; skipping upstream call",
            ));
        }

        if let Err(delay) = self.throttle.acquire() {
            return Err(SourceError::rate_limited(format!(
                "tiingo request quota exhausted; retry in {}s",
                delay.as_secs()
            )));
        }
        self.throttle.complete_one();

        let request = HttpRequest::get(endpoint).with_auth(&self.auth);
        let response = self.http_client.execute(request).await.map_err(|error| {
            self.circuit_breaker.record_failure();
            if error.retryable() {
                SourceError::unavailable(format!("tiingo transport error: {}", error.message()))
            } else {
                SourceError::malformed_response(format!(
                    "tiingo transport error: {}",
                    error.message()
                ))
            }
        })?;

        if !response.is_success() {
            self.circuit_breaker.record_failure();
            return Err(match response.status {
                401 | 403 => SourceError::bad_credentials(format!(
                    "tiingo rejected credentials with status {}",
                    response.status
                )),
                429 => SourceError::rate_limited("tiingo request quota exhausted"),
                status => {
                    SourceError::unavailable(format!("tiingo upstream returned status {status}"))
                }
            });
        }

        self.circuit_breaker.record_success();
        Ok(())
    }
}

impl SourceAdapter for TiingoAdapter {
    fn id(&self) -> SourceId {
        SourceId::Tiingo
    }

    fn schema(&self) -> &'static SourceSchema {
        schema_for(SourceId::Tiingo)
    }

    fn extract(&self, since: Option<Watermark>) -> ExtractFuture<'_> {
        Box::pin(async move {
            if self.catalog.is_empty() {
                return Err(SourceError::invalid_request(
                    "tiingo extraction requires at least one ticker",
                ));
            }

            self.execute_authenticated_call("https://api.tiingo.com/tiingo/daily/prices")
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

    let base = 80.0 + (seed % 12_000) as f64 / 100.0;
    let payload = json!({
        "ticker": ticker,
        "trade_date": trade_date,
        "open": base - 0.35,
        "high": base + 1.25,
        "low": base - 1.40,
        "close": base + 0.40,
        "volume": 1_000_000 + (seed % 8_000_000) as i64,
    });

    SourceRecord::new(
        SourceId::Tiingo,
        natural_key_for(ticker, trade_date),
        payload,
        extracted_at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpResponse};
    use std::collections::HashSet;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct RecordingHttpClient {
        response: Result<HttpResponse, HttpError>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn success() -> Self {
            Self {
                response: Ok(HttpResponse::ok_json("{}")),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn status(status: u16) -> Self {
            Self {
                response: Ok(HttpResponse {
                    status,
                    body: String::new(),
                }),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn recorded_requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .clone()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    fn anchored_adapter() -> TiingoAdapter {
        TiingoAdapter::default()
            .with_anchor(UtcDateTime::parse("2024-01-03T22:00:00Z").expect("anchor"))
            .with_lookback_days(2)
    }

    #[tokio::test]
    async fn extraction_applies_api_token_header() {
        let client = Arc::new(RecordingHttpClient::success());
        let adapter = TiingoAdapter::with_http_client(
            client.clone(),
            HttpAuth::Header {
                name: String::from("authorization"),
                value: String::from("Token key-123"),
            },
        )
        .with_anchor(UtcDateTime::parse("2024-01-03T22:00:00Z").expect("anchor"));

        adapter.extract(None).await.expect("extract should succeed");

        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Token key-123")
        );
    }

    #[tokio::test]
    async fn batch_has_no_duplicate_natural_keys() {
        let adapter = anchored_adapter();
        let records = adapter.extract(None).await.expect("extract");

        let keys: HashSet<_> = records
            .iter()
            .map(|record| record.natural_key.as_str().to_owned())
            .collect();
        assert_eq!(keys.len(), records.len());
        assert_eq!(records.len(), 2 * super::super::DEFAULT_CATALOG.len());
    }

    #[tokio::test]
    async fn repeated_extraction_with_same_since_is_identical() {
        let adapter = anchored_adapter();
        let since = Watermark::parse("2024-01-02T21:00:00Z").expect("since");

        let first = adapter.extract(Some(since)).await.expect("first");
        let second = adapter.extract(Some(since)).await.expect("second");
        assert_eq!(first, second);

        for record in &first {
            assert!(record.watermark() > since);
        }
    }

    #[tokio::test]
    async fn unauthorized_status_is_a_permanent_error() {
        let client = Arc::new(RecordingHttpClient::status(401));
        let adapter = TiingoAdapter::with_http_client(
            client,
            HttpAuth::Header {
                name: String::from("authorization"),
                value: String::from("Token bad"),
            },
        );

        let error = adapter.extract(None).await.expect_err("must fail");
        assert!(!error.is_transient());
        assert_eq!(error.code(), "source.bad_credentials");
    }

    #[tokio::test]
    async fn repeated_failures_open_the_circuit() {
        let client = Arc::new(RecordingHttpClient::status(500));
        let adapter = TiingoAdapter::with_http_client(
            client,
            HttpAuth::None,
        );

        for _ in 0..3 {
            let error = adapter.extract(None).await.expect_err("must fail");
            assert!(error.is_transient());
        }

        let health = adapter.health().await;
        assert_eq!(health.state, HealthState::Unhealthy);
        assert!(!health.rate_available);
    }
}
