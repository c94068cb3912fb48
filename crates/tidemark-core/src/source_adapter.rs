use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{SourceId, SourceRecord, SourceSchema, Watermark};

/// Health state used by source scoring and the `sources` command output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Runtime source health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub rate_available: bool,
    pub score: u16,
}

impl HealthStatus {
    pub const fn new(state: HealthState, rate_available: bool, score: u16) -> Self {
        Self {
            state,
            rate_available,
            score,
        }
    }

    pub const fn healthy(score: u16) -> Self {
        Self::new(HealthState::Healthy, true, score)
    }
}

/// Adapter-level error classification.
///
/// `RateLimited`, `Unavailable`, and `Timeout` are transient: the caller may
/// retry the same `since` watermark. The remaining kinds are permanent and
/// must fail the source node for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    RateLimited,
    Unavailable,
    Timeout,
    BadCredentials,
    MalformedResponse,
    InvalidRequest,
}

/// Structured source error surfaced to the scheduler's retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn bad_credentials(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::BadCredentials,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::MalformedResponse,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the scheduler's bounded retry policy applies.
    pub const fn is_transient(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::BadCredentials => "source.bad_credentials",
            SourceErrorKind::MalformedResponse => "source.malformed_response",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

pub type ExtractFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<SourceRecord>, SourceError>> + Send + 'a>>;

pub type HealthFuture<'a> = Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>>;

/// Uniform extraction contract implemented per provider.
///
/// Adapters never self-retry. An `extract` call is safe to repeat with the
/// same `since` watermark and must not emit duplicate natural keys within a
/// single batch; cross-call dedup belongs to the landing writer.
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;
    fn schema(&self) -> &'static SourceSchema;
    fn extract(&self, since: Option<Watermark>) -> ExtractFuture<'_>;
    fn health(&self) -> HealthFuture<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(SourceError::rate_limited("quota").is_transient());
        assert!(SourceError::unavailable("down").is_transient());
        assert!(SourceError::timeout("slow").is_transient());
    }

    #[test]
    fn permanent_kinds_are_not_retryable() {
        assert!(!SourceError::bad_credentials("denied").is_transient());
        assert!(!SourceError::malformed_response("not json").is_transient());
        assert!(!SourceError::invalid_request("bad window").is_transient());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(SourceError::timeout("slow").code(), "source.timeout");
        assert_eq!(
            SourceError::bad_credentials("denied").code(),
            "source.bad_credentials"
        );
    }
}
