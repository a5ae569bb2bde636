//! Network manager configuration.

use crate::error::ConfigError;
use courier_dispatch_pooled::SendPoolConfig;
use courier_queue::{Priority, PriorityOrder, PriorityQueue};
use courier_rpc::ListenerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the sender loop does when the bounded send pool is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Leave messages queued until workers free up.
    #[default]
    Block,
    /// Drop the message and log it as a backpressure failure.
    Reject,
}

/// Configuration for a [`NetworkManager`](crate::NetworkManager).
///
/// Every field has a default, so a TOML section only needs the values it
/// changes:
///
/// ```toml
/// block_size = 10
/// known_priorities = [0, 1, 2]
/// restrict_to_known = true
/// priority_order = "lowest_first"
///
/// [listener]
/// listen_addr = "0.0.0.0:13127"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkManagerConfig {
    /// Messages dequeued per sender cycle. 0 drains everything queued.
    pub block_size: usize,

    /// Longest the sender loop sleeps without a wake-up.
    pub poll_interval_ms: u64,

    /// Bounded rayon pool (true) or one thread per message (false).
    pub use_worker_pool: bool,

    /// Send pool threads.
    pub worker_count: usize,

    /// Sends accepted by the pool but not finished.
    pub max_pending: usize,

    pub backpressure: Backpressure,

    /// Priorities whose buckets are created up front.
    pub known_priorities: Vec<i64>,

    /// Refuse messages at priorities outside `known_priorities`.
    pub restrict_to_known: bool,

    pub priority_order: PriorityOrder,

    /// Inbound listener; `None` runs outbound-only.
    pub listener: Option<ListenerConfig>,
}

impl Default for NetworkManagerConfig {
    fn default() -> Self {
        Self {
            block_size: 1,
            poll_interval_ms: 100,
            use_worker_pool: true,
            worker_count: 10,
            max_pending: 1024,
            backpressure: Backpressure::Block,
            known_priorities: Vec::new(),
            restrict_to_known: false,
            priority_order: PriorityOrder::HighestFirst,
            listener: None,
        }
    }
}

impl NetworkManagerConfig {
    pub fn builder() -> NetworkManagerConfigBuilder {
        NetworkManagerConfigBuilder::new()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.max_pending == 0 {
            return Err(ConfigError::Invalid(
                "max_pending must be at least 1".to_string(),
            ));
        }
        if self.use_worker_pool && self.max_pending < self.worker_count {
            return Err(ConfigError::Invalid(format!(
                "max_pending ({}) must be at least worker_count ({})",
                self.max_pending, self.worker_count
            )));
        }
        if self.restrict_to_known && self.known_priorities.is_empty() {
            tracing::warn!("restrict_to_known set without known_priorities; restriction is inactive");
        }
        if let Some(listener) = &self.listener {
            listener
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Send pool sizing derived from this configuration.
    pub fn send_pool_config(&self) -> SendPoolConfig {
        SendPoolConfig::builder()
            .send_threads(self.worker_count)
            .max_pending(self.max_pending)
            .build_unchecked()
    }

    /// Build the empty queue described by this configuration.
    pub fn build_queue(&self) -> PriorityQueue {
        PriorityQueue::with_known_priorities(
            self.priority_order,
            self.known_priorities.iter().copied().map(Priority::new),
            self.restrict_to_known,
        )
    }
}

/// Builder for NetworkManagerConfig.
#[derive(Debug, Clone, Default)]
pub struct NetworkManagerConfigBuilder {
    config: NetworkManagerConfig,
}

impl NetworkManagerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn use_worker_pool(mut self, enabled: bool) -> Self {
        self.config.use_worker_pool = enabled;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn max_pending(mut self, count: usize) -> Self {
        self.config.max_pending = count;
        self
    }

    pub fn backpressure(mut self, policy: Backpressure) -> Self {
        self.config.backpressure = policy;
        self
    }

    pub fn known_priorities(mut self, priorities: impl IntoIterator<Item = i64>) -> Self {
        self.config.known_priorities = priorities.into_iter().collect();
        self
    }

    pub fn restrict_to_known(mut self, restrict: bool) -> Self {
        self.config.restrict_to_known = restrict;
        self
    }

    pub fn priority_order(mut self, order: PriorityOrder) -> Self {
        self.config.priority_order = order;
        self
    }

    pub fn listener(mut self, listener: ListenerConfig) -> Self {
        self.config.listener = Some(listener);
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<NetworkManagerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> NetworkManagerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NetworkManagerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.block_size, 1);
        assert_eq!(config.backpressure, Backpressure::Block);
        assert_eq!(config.priority_order, PriorityOrder::HighestFirst);
        assert!(config.listener.is_none());
    }

    #[test]
    fn test_builder_validation() {
        assert!(NetworkManagerConfig::builder()
            .poll_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(NetworkManagerConfig::builder().worker_count(0).build().is_err());
        assert!(NetworkManagerConfig::builder()
            .worker_count(8)
            .max_pending(4)
            .build()
            .is_err());

        // Without a pool, max_pending is not tied to worker_count.
        assert!(NetworkManagerConfig::builder()
            .use_worker_pool(false)
            .worker_count(8)
            .max_pending(4)
            .build()
            .is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: NetworkManagerConfig = toml::from_str(
            r#"
            block_size = 0
            known_priorities = [0, 1, 2]
            restrict_to_known = true
            priority_order = "lowest_first"
            backpressure = "reject"

            [listener]
            listen_addr = "127.0.0.1:13127"
            worker_threads = 4
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.block_size, 0);
        assert_eq!(config.worker_count, 10);
        assert_eq!(config.backpressure, Backpressure::Reject);
        assert_eq!(config.priority_order, PriorityOrder::LowestFirst);
        assert_eq!(config.listener.unwrap().worker_threads, 4);
    }

    #[test]
    fn test_build_queue_applies_restriction() {
        let config = NetworkManagerConfig::builder()
            .known_priorities([0, 1, 2])
            .restrict_to_known(true)
            .build()
            .unwrap();

        let queue = config.build_queue();
        assert!(queue.is_restricted());
        assert!(queue.accepts(Priority::new(2)));
        assert!(!queue.accepts(Priority::new(3)));
    }

    #[test]
    fn test_send_pool_config_follows_manager_config() {
        let config = NetworkManagerConfig::builder()
            .worker_count(4)
            .max_pending(16)
            .build()
            .unwrap();
        let pool = config.send_pool_config();
        assert_eq!(pool.send_threads, 4);
        assert_eq!(pool.max_pending, 16);
    }
}
