//! NotifierConfig - Config Loader output
//!
//! Static configuration loaded once at startup and passed explicitly to
//! every component. Nothing mutates it after load.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete notifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Broker host
    pub broker_host: String,

    /// Broker port (Gearman default 4730)
    pub broker_port: u16,

    /// Whether inbound requests produce notifications at all
    pub enabled: bool,

    /// Total submit attempts per event, including the first
    pub max_retry_attempts: u32,

    /// Buffered events at which producers start blocking
    pub queue_high_water: usize,

    /// Buffered events at which blocked producers resume (default: 3/4 of high water)
    pub queue_low_water: Option<usize>,

    /// Number of dispatcher workers
    pub worker_count: usize,

    /// Max events taken per dequeue
    pub batch_size: usize,

    /// Max live broker connections
    pub broker_pool_size: usize,

    pub connect_timeout_ms: u64,

    /// Limit for one submit round-trip
    pub submit_timeout_ms: u64,

    pub retry_initial_backoff_ms: u64,

    pub retry_max_backoff_ms: u64,

    /// How long shutdown waits for the queue to drain
    pub shutdown_timeout_ms: u64,

    /// Extra time given to in-flight submits after the drain deadline
    pub shutdown_grace_ms: u64,

    /// Only paths under one of these prefixes are notified (empty = all)
    pub path_prefixes: Vec<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 4730,
            enabled: false,
            max_retry_attempts: 3,
            queue_high_water: 1024,
            queue_low_water: None,
            worker_count: 8,
            batch_size: 32,
            broker_pool_size: 4,
            connect_timeout_ms: 2000,
            submit_timeout_ms: 5000,
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 5000,
            shutdown_timeout_ms: 10_000,
            shutdown_grace_ms: 1000,
            path_prefixes: Vec::new(),
        }
    }
}

impl NotifierConfig {
    /// `host:port` of the broker
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    /// Effective low-water mark
    pub fn low_water(&self) -> usize {
        self.queue_low_water
            .unwrap_or(self.queue_high_water.saturating_mul(3) / 4)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NotifierConfig::default();
        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 4730);
        assert!(!config.enabled);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.broker_addr(), "localhost:4730");
    }

    #[test]
    fn test_low_water_default() {
        let config = NotifierConfig {
            queue_high_water: 100,
            ..Default::default()
        };
        assert_eq!(config.low_water(), 75);

        let config = NotifierConfig {
            queue_high_water: 100,
            queue_low_water: Some(10),
            ..Default::default()
        };
        assert_eq!(config.low_water(), 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NotifierConfig =
            serde_json::from_str(r#"{ "enabled": true, "broker_port": 4800 }"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.broker_port, 4800);
        assert_eq!(config.worker_count, 8);
    }
}
