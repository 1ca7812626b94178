//! Bootstrap engine configuration.

use crate::SyncError;
use std::time::Duration;

/// Configuration for the bootstrap engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval the sync loop sleeps between ticks.
    pub sleep_interval: Duration,

    /// How long a sync attempt waits for a requested header or body before
    /// failing with a timeout.
    pub wait_time: Duration,

    /// Maximum consecutive timed-out requests tolerated before a rollback and
    /// a probable-highest-nonce reset are forced.
    pub max_requests_with_timeout: u32,

    /// Upper bound on the look-ahead window of headers requested in advance.
    pub max_headers_requested_in_advance: u64,

    /// Number of trailing blocks that must be re-applied together during
    /// startup replay to guarantee a consistent state.
    pub block_finality: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sleep_interval: Duration::from_millis(5),
            wait_time: Duration::from_secs(3),
            max_requests_with_timeout: 3,
            max_headers_requested_in_advance: 10,
            block_finality: 1,
        }
    }
}

impl SyncConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sync loop tick interval.
    pub fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    /// Set the per-request wait timeout.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Set the consecutive-timeout threshold.
    pub fn with_max_requests_with_timeout(mut self, max: u32) -> Self {
        self.max_requests_with_timeout = max;
        self
    }

    /// Set the look-ahead request window.
    pub fn with_max_headers_requested_in_advance(mut self, max: u64) -> Self {
        self.max_headers_requested_in_advance = max;
        self
    }

    /// Set the replay finality window.
    pub fn with_block_finality(mut self, finality: u64) -> Self {
        self.block_finality = finality;
        self
    }

    /// Validate the configuration, failing fast before the sync loop starts.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.wait_time.is_zero() {
            return Err(SyncError::InvalidConfig(
                "wait_time must be non-zero".to_string(),
            ));
        }
        if self.sleep_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "sleep_interval must be non-zero".to_string(),
            ));
        }
        if self.max_headers_requested_in_advance == 0 {
            return Err(SyncError::InvalidConfig(
                "max_headers_requested_in_advance must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_wait_time_is_rejected() {
        let config = SyncConfig::default().with_wait_time(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_sleep_interval_is_rejected() {
        let config = SyncConfig::default().with_sleep_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_look_ahead_is_rejected() {
        let config = SyncConfig::default().with_max_headers_requested_in_advance(0);
        assert!(config.validate().is_err());
    }
}
