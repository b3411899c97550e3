//! Tunables consumed by the core layer.
//!
//! The embedding process owns where these come from (a TOML file, flags,
//! defaults); this layer only reads them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default sliding window for duplicate and save-pattern detection.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(150);

/// Default interval between attempts of a retrying read.
pub const DEFAULT_RETRY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default deadline for a retrying read.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscriber bags smaller than this are never compacted.
pub const DEFAULT_COMPACTION_MIN: usize = 16;

/// Core configuration. Durations are milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// How long raw events stay in the coalescer's window.
    pub dedup_window_ms: u64,
    /// Sleep between attempts of a retrying read.
    pub retry_poll_interval_ms: u64,
    /// Give up a retrying read after this long.
    pub retry_timeout_ms: u64,
    /// Minimum bag size before dead subscribers are purged.
    pub compaction_min: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: DEFAULT_DEDUP_WINDOW.as_millis() as u64,
            retry_poll_interval_ms: DEFAULT_RETRY_POLL_INTERVAL.as_millis() as u64,
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT.as_millis() as u64,
            compaction_min: DEFAULT_COMPACTION_MIN,
        }
    }
}

impl CoreConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn retry_poll_interval(&self) -> Duration {
        Duration::from_millis(self.retry_poll_interval_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window_ms = window.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.dedup_window(), Duration::from_millis(150));
        assert_eq!(config.compaction_min, DEFAULT_COMPACTION_MIN);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: CoreConfig = toml::from_str("dedup_window_ms = 300").unwrap();
        assert_eq!(config.dedup_window(), Duration::from_millis(300));
        assert_eq!(config.retry_timeout(), DEFAULT_RETRY_TIMEOUT);
    }
}
