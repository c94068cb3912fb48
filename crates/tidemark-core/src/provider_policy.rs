use std::time::Duration;

use crate::SourceId;

/// Per-provider quota and retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub source_id: SourceId,
    pub max_concurrency: usize,
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub retry_backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl ProviderPolicy {
    /// Tiingo free tier: 50 requests per hour.
    pub fn tiingo_default() -> Self {
        Self {
            source_id: SourceId::Tiingo,
            max_concurrency: 2,
            quota_window: Duration::from_secs(3_600),
            quota_limit: 50,
            retry_backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
                max_retries: 3,
            },
        }
    }

    /// Alpha Vantage free tier: 5 requests per minute.
    pub fn alphavantage_default() -> Self {
        Self {
            source_id: SourceId::Alphavantage,
            max_concurrency: 1,
            quota_window: Duration::from_secs(60),
            quota_limit: 5,
            retry_backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
                max_retries: 3,
            },
        }
    }

    /// Yahoo is unauthenticated; keep the request rate polite.
    pub fn yahoo_default() -> Self {
        Self {
            source_id: SourceId::Yahoo,
            max_concurrency: 4,
            quota_window: Duration::from_secs(60),
            quota_limit: 30,
            retry_backoff: BackoffPolicy {
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
                max_retries: 3,
            },
        }
    }

    pub fn default_for(source_id: SourceId) -> Self {
        match source_id {
            SourceId::Tiingo => Self::tiingo_default(),
            SourceId::Alphavantage => Self::alphavantage_default(),
            SourceId::Yahoo => Self::yahoo_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphavantage_policy_matches_free_tier() {
        let policy = ProviderPolicy::alphavantage_default();

        assert_eq!(policy.source_id, SourceId::Alphavantage);
        assert_eq!(policy.max_concurrency, 1);
        assert_eq!(policy.quota_window, Duration::from_secs(60));
        assert_eq!(policy.quota_limit, 5);
    }

    #[test]
    fn tiingo_policy_uses_hourly_window() {
        let policy = ProviderPolicy::tiingo_default();

        assert_eq!(policy.source_id, SourceId::Tiingo);
        assert_eq!(policy.quota_window, Duration::from_secs(3_600));
        assert_eq!(policy.quota_limit, 50);
    }

    #[test]
    fn every_source_has_a_default_policy() {
        for source in SourceId::ALL {
            assert_eq!(ProviderPolicy::default_for(source).source_id, source);
        }
    }
}
