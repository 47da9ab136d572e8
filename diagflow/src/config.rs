//! Coordinator configuration.
//!
//! The engine never reads the environment itself; the embedding application
//! builds a [`CoordinatorConfig`] (directly or from JSON) and hands it over.

use crate::errors::BundleError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default cap on concurrent node calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 32;

/// Default timeout for a single node call, in milliseconds.
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 10_000;

/// Default sleep between polling rounds, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default overall deadline for a bundle, in milliseconds.
pub const DEFAULT_OVERALL_DEADLINE_MS: u64 = 5 * 60 * 1_000;

/// Tuning knobs for the bundle coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum number of node calls in flight at once, across all bundles.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Timeout for one node call in milliseconds.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,
    /// Sleep between polling rounds in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Time a bundle may take from creation until unfinished nodes are
    /// marked timed out, in milliseconds.
    #[serde(default = "default_overall_deadline_ms")]
    pub overall_deadline_ms: u64,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_node_timeout_ms() -> u64 {
    DEFAULT_NODE_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_overall_deadline_ms() -> u64 {
    DEFAULT_OVERALL_DEADLINE_MS
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            node_timeout_ms: default_node_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            overall_deadline_ms: default_overall_deadline_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the JSON is malformed or the values fail
    /// validation.
    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BundleError::invalid_request(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the concurrency cap.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the per-node timeout.
    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_to_ms(interval);
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    pub fn with_overall_deadline(mut self, deadline: Duration) -> Self {
        self.overall_deadline_ms = duration_to_ms(deadline);
        self
    }

    /// Per-node timeout as a duration.
    #[must_use]
    pub const fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Overall deadline as a duration.
    #[must_use]
    pub const fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` naming the first offending field.
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.max_concurrency == 0 {
            return Err(BundleError::invalid_request(
                "max_concurrency must be at least 1",
            ));
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(BundleError::invalid_request(format!(
                "max_concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.node_timeout_ms == 0 {
            return Err(BundleError::invalid_request(
                "node_timeout_ms must be greater than zero",
            ));
        }
        if self.overall_deadline_ms == 0 {
            return Err(BundleError::invalid_request(
                "overall_deadline_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_concurrency, 32);
        assert_eq!(config.node_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CoordinatorConfig::new()
            .with_max_concurrency(4)
            .with_node_timeout(Duration::from_millis(150))
            .with_poll_interval(Duration::from_millis(20))
            .with_overall_deadline(Duration::from_secs(1));

        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.node_timeout_ms, 150);
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.overall_deadline(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = CoordinatorConfig::from_json(r#"{"max_concurrency": 8}"#).unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.node_timeout_ms, DEFAULT_NODE_TIMEOUT_MS);
        assert_eq!(config.overall_deadline_ms, DEFAULT_OVERALL_DEADLINE_MS);
    }

    #[test]
    fn test_from_json_rejects_zero_concurrency() {
        let err = CoordinatorConfig::from_json(r#"{"max_concurrency": 0}"#).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_from_json_rejects_concurrency_above_permit_limit() {
        let err = CoordinatorConfig::from_json(r#"{"max_concurrency": 18446744073709551615}"#)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(err.to_string().contains("at most"));

        let at_limit = CoordinatorConfig::new().with_max_concurrency(Semaphore::MAX_PERMITS);
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(CoordinatorConfig::from_json("{not json").is_err());
    }
}
