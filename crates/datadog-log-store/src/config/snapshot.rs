// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::config::{
    Config, DEFAULT_BATCH_MAX_BYTES, DEFAULT_BATCH_MAX_COUNT, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_FLUSH_INTERVAL, DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_ATTEMPTS,
    DEFAULT_RETRY_MAX_DELAY, DEFAULT_STORAGE_MAX_SIZE,
};

/// Retry policy applied to transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transport attempts per batch, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (1-based):
    /// `min(base_delay * 2^(attempt - 1), max_delay)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Immutable view of the runtime configuration.
///
/// Readers hold an `Arc` to one snapshot for the duration of an operation;
/// updates publish a whole new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub max_storage_bytes: u64,
    pub batch_max_count: usize,
    pub batch_max_bytes: u64,
    pub flush_interval: Duration,
    pub enabled: bool,
    pub retry: RetryPolicy,
    /// Flush destination.
    pub log_url: String,
    pub install_id: String,
    pub country_code: String,
    pub use_compression: bool,
    pub compression_level: i32,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        ConfigSnapshot {
            max_storage_bytes: DEFAULT_STORAGE_MAX_SIZE,
            batch_max_count: DEFAULT_BATCH_MAX_COUNT,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            enabled: true,
            retry: RetryPolicy::default(),
            log_url: String::new(),
            install_id: String::new(),
            country_code: String::new(),
            use_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl From<&Config> for ConfigSnapshot {
    fn from(config: &Config) -> Self {
        ConfigSnapshot {
            max_storage_bytes: config.storage_max_size,
            batch_max_count: config.batch_max_count,
            batch_max_bytes: config.batch_max_bytes,
            flush_interval: config.flush_interval,
            enabled: config.enabled,
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: config.retry_base_delay,
                max_delay: config.retry_max_delay,
            },
            log_url: config.log_url.clone(),
            install_id: config.install_id.clone(),
            country_code: config.country_code.clone(),
            use_compression: config.use_compression,
            compression_level: config.compression_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_is_monotonic_with_defaults() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=10).map(|a| policy.backoff(a)).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[9], Duration::from_secs(60));
    }

    #[test]
    fn test_snapshot_from_config() {
        let config = Config {
            storage_max_size: 42,
            install_id: "abc".to_string(),
            ..Config::default()
        };

        let snapshot = ConfigSnapshot::from(&config);

        assert_eq!(snapshot.max_storage_bytes, 42);
        assert_eq!(snapshot.install_id, "abc");
        assert_eq!(snapshot.retry, RetryPolicy::default());
        assert_eq!(
            ConfigSnapshot::from(&Config::default()),
            ConfigSnapshot::default()
        );
    }
}
