//! Explicit run-scoped context threaded through scheduler, adapters, and
//! executor. Replaces any ambient client or credential state; lifecycle is
//! one run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tidemark_core::{RetryConfig, Warehouse, Watermark};
use uuid::Uuid;

/// Cooperative cancellation signal checked between node executions.
/// In-flight work always runs to completion or to its own timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub warehouse: Warehouse,
    /// Bounded retry policy for transient source errors.
    pub retry: RetryConfig,
    /// Per-adapter-call timeout; expiry is treated as a transient error.
    pub source_timeout: Duration,
    /// Per-node materialization timeout; expiry is a transformation error.
    pub model_timeout: Duration,
    /// Force all extractions to start from this watermark instead of each
    /// source's stored high watermark.
    pub since_override: Option<Watermark>,
    cancel: CancelFlag,
}

impl RunContext {
    pub fn new(warehouse: Warehouse) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            warehouse,
            retry: RetryConfig::default(),
            source_timeout: Duration::from_secs(30),
            model_timeout: Duration::from_secs(120),
            since_override: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_since(mut self, since: Watermark) -> Self {
        self.since_override = Some(since);
        self
    }

    /// Handle the caller keeps to request cancellation mid-run.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();

        assert!(!observer.is_cancelled());
        flag.cancel();
        assert!(observer.is_cancelled());
    }
}
