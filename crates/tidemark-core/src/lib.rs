//! Core contracts for tidemark.
//!
//! This crate contains:
//! - Canonical domain types and validation (timestamps, watermarks, records)
//! - Source identifiers and declared landing schemas
//! - The source adapter contract, error taxonomy, and provider adapters
//! - Provider rate policies, throttling, and retry/backoff configuration
//! - The response envelope for machine-readable output

pub mod adapters;
pub mod circuit_breaker;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod provider_policy;
pub mod record;
pub mod retry;
pub mod source;
pub mod source_adapter;
pub mod throttling;

pub use adapters::{AlphaVantageAdapter, TiingoAdapter, YahooAdapter};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use domain::{UtcDateTime, Watermark};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta};
pub use error::{CoreError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
};
pub use provider_policy::{BackoffPolicy, ProviderPolicy};
pub use record::{schema_for, NaturalKey, SourceRecord, SourceSchema};
pub use retry::{Backoff, RetryConfig};
pub use source::SourceId;
pub use source_adapter::{
    ExtractFuture, HealthFuture, HealthState, HealthStatus, SourceAdapter, SourceError,
    SourceErrorKind,
};
pub use throttling::ThrottlingQueue;
pub use tidemark_warehouse::{
    FieldKind, FieldSpec, LandingRecord, LandingWriter, QueryGuardrails, QueryResult, RunNodeRow,
    RunRow, RunSummary, SqlColumn, TableSchema, Warehouse, WarehouseConfig, WarehouseError,
    WatermarkScope, WriteResult,
};
