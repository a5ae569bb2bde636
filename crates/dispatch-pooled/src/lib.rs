//! Rayon thread pool dispatch.
//!
//! This module provides [`PooledDispatch`], which runs outbound sends on one
//! fixed-size rayon pool. The pool caps concurrent remote calls at
//! `send_threads`, and the number of accepted-but-unfinished sends at
//! `max_pending`: past that bound [`Dispatch::try_spawn_send`] refuses new
//! work so the caller can block or reject instead of growing memory.
//!
//! # Example
//!
//! ```no_run
//! use courier_dispatch_pooled::{PooledDispatch, SendPoolConfig};
//!
//! // Auto-detect cores and use default sizing
//! let dispatch = PooledDispatch::new(SendPoolConfig::auto()).unwrap();
//!
//! // Or customize
//! let config = SendPoolConfig::builder()
//!     .send_threads(4)
//!     .max_pending(256)
//!     .build()
//!     .unwrap();
//!
//! let dispatch = PooledDispatch::new(config).unwrap();
//! ```

use courier_dispatch::{CompletionHook, Dispatch, DispatchError, InFlight};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors from send pool configuration.
#[derive(Debug, Error)]
pub enum ThreadPoolError {
    #[error("Failed to build rayon thread pool: {0}")]
    RayonBuildError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the send pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SendPoolConfig {
    /// Number of worker threads, i.e. maximum concurrent remote calls.
    /// Sends mostly wait on the network, so this can exceed the core count.
    pub send_threads: usize,

    /// Maximum sends accepted but not yet finished (running + waiting for a
    /// worker). Bounds the pool's internal submission queue.
    pub max_pending: usize,

    /// Stack size for send threads (bytes). Default: 2MB.
    pub stack_size: usize,
}

impl Default for SendPoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

impl SendPoolConfig {
    /// Automatically configure based on available CPU cores.
    ///
    /// Uses two send threads per core, clamped to `4..=32`, and lets up to 64
    /// sends per thread wait for a worker.
    pub fn auto() -> Self {
        let available = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);

        Self::for_core_count(available)
    }

    /// Configure for a specific number of available cores.
    pub fn for_core_count(total_cores: usize) -> Self {
        let send_threads = (total_cores * 2).clamp(4, 32);
        Self {
            send_threads,
            max_pending: send_threads * 64,
            stack_size: 2 * 1024 * 1024,
        }
    }

    /// Create a minimal configuration for testing (1 thread).
    pub fn minimal() -> Self {
        Self {
            send_threads: 1,
            max_pending: 64,
            stack_size: 2 * 1024 * 1024,
        }
    }

    /// Create a builder for custom configuration.
    pub fn builder() -> SendPoolConfigBuilder {
        SendPoolConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ThreadPoolError> {
        if self.send_threads == 0 {
            return Err(ThreadPoolError::InvalidConfig(
                "send_threads must be at least 1".to_string(),
            ));
        }
        if self.max_pending < self.send_threads {
            return Err(ThreadPoolError::InvalidConfig(format!(
                "max_pending ({}) must be at least send_threads ({})",
                self.max_pending, self.send_threads
            )));
        }
        if self.stack_size < 64 * 1024 {
            return Err(ThreadPoolError::InvalidConfig(
                "stack_size must be at least 64KiB".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for SendPoolConfig.
#[derive(Debug, Clone)]
pub struct SendPoolConfigBuilder {
    config: SendPoolConfig,
}

impl SendPoolConfigBuilder {
    /// Create a new builder with auto-detected defaults.
    pub fn new() -> Self {
        Self {
            config: SendPoolConfig::auto(),
        }
    }

    /// Set the number of send threads.
    pub fn send_threads(mut self, count: usize) -> Self {
        self.config.send_threads = count;
        self
    }

    /// Set the pending-send bound.
    pub fn max_pending(mut self, count: usize) -> Self {
        self.config.max_pending = count;
        self
    }

    /// Set stack size for send threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<SendPoolConfig, ThreadPoolError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> SendPoolConfig {
        self.config
    }
}

impl Default for SendPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Rayon thread pool dispatch.
///
/// A panicking send is reported by the pool's panic handler and does not take
/// the worker thread down.
pub struct PooledDispatch {
    config: SendPoolConfig,
    pool: Arc<rayon::ThreadPool>,
    in_flight: Arc<InFlight>,
}

impl PooledDispatch {
    /// Create a new pooled dispatch with the given configuration.
    pub fn new(config: SendPoolConfig) -> Result<Self, ThreadPoolError> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.send_threads)
            .stack_size(config.stack_size)
            .thread_name(|i| format!("courier-send-{}", i))
            .panic_handler(|_| tracing::error!("Send panicked on worker pool"))
            .build()
            .map_err(|e| ThreadPoolError::RayonBuildError(e.to_string()))?;

        tracing::info!(
            send_threads = config.send_threads,
            max_pending = config.max_pending,
            "Send pool initialized"
        );

        Ok(Self {
            config,
            pool: Arc::new(pool),
            in_flight: InFlight::new(),
        })
    }

    /// Create with auto-detected configuration.
    pub fn auto() -> Result<Self, ThreadPoolError> {
        Self::new(SendPoolConfig::auto())
    }

    /// Get the configuration.
    pub fn config(&self) -> &SendPoolConfig {
        &self.config
    }
}

impl std::fmt::Debug for PooledDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledDispatch")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.get())
            .finish()
    }
}

impl Dispatch for PooledDispatch {
    #[instrument(level = "debug", skip_all)]
    fn spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        let guard = self.in_flight.enter();
        self.pool.spawn(move || {
            let _guard = guard;
            f();
        });
        Ok(())
    }

    fn try_spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        if self.in_flight.get() >= self.config.max_pending {
            return Err(DispatchError::Saturated);
        }

        self.spawn_send(f)
    }

    fn send_queue_depth(&self) -> usize {
        self.in_flight.get()
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.config.max_pending)
    }

    fn wait_idle(&self) {
        self.in_flight.wait_idle();
    }

    fn set_completion_hook(&self, hook: CompletionHook) {
        self.in_flight.set_exit_hook(hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_auto_config() {
        let config = SendPoolConfig::auto();
        assert!(config.send_threads >= 4);
        assert!(config.max_pending >= config.send_threads);
        config.validate().unwrap();
    }

    #[test]
    fn test_for_core_count() {
        let config = SendPoolConfig::for_core_count(1);
        assert_eq!(config.send_threads, 4);
        assert_eq!(config.max_pending, 256);

        let config = SendPoolConfig::for_core_count(8);
        assert_eq!(config.send_threads, 16);

        let config = SendPoolConfig::for_core_count(64);
        assert_eq!(config.send_threads, 32);
    }

    #[test]
    fn test_builder() {
        let config = SendPoolConfig::builder()
            .send_threads(3)
            .max_pending(9)
            .build()
            .unwrap();

        assert_eq!(config.send_threads, 3);
        assert_eq!(config.max_pending, 9);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SendPoolConfig::builder().send_threads(0).build().is_err());
        assert!(SendPoolConfig::builder()
            .send_threads(8)
            .max_pending(2)
            .build()
            .is_err());
        assert!(SendPoolConfig::builder().stack_size(1024).build().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SendPoolConfig = serde_json::from_str(r#"{"send_threads": 2}"#).unwrap();
        assert_eq!(config.send_threads, 2);
        assert_eq!(config.stack_size, 2 * 1024 * 1024);
    }

    #[test]
    fn test_spawn_on_pool() {
        let dispatch = PooledDispatch::new(SendPoolConfig::minimal()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            dispatch
                .spawn_send(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        dispatch.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(dispatch.send_queue_depth(), 0);
    }

    #[test]
    fn test_try_spawn_refuses_when_saturated() {
        let config = SendPoolConfig::builder()
            .send_threads(1)
            .max_pending(2)
            .build()
            .unwrap();
        let dispatch = PooledDispatch::new(config).unwrap();
        assert_eq!(dispatch.capacity(), Some(2));

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(std::sync::Mutex::new(release_rx));

        for _ in 0..2 {
            let rx = release_rx.clone();
            dispatch
                .try_spawn_send(move || {
                    let _ = rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
                })
                .unwrap();
        }
        assert_eq!(dispatch.send_queue_depth(), 2);
        assert_eq!(
            dispatch.try_spawn_send(|| {}),
            Err(DispatchError::Saturated)
        );

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        dispatch.wait_idle();
        assert!(dispatch.try_spawn_send(|| {}).is_ok());
        dispatch.wait_idle();
    }

    #[test]
    fn test_panicking_send_does_not_kill_pool() {
        let dispatch = PooledDispatch::new(SendPoolConfig::minimal()).unwrap();
        dispatch.spawn_send(|| panic!("send failed hard")).unwrap();
        dispatch.wait_idle();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        dispatch
            .spawn_send(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        dispatch.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_hook_runs_after_slot_is_free() {
        let config = SendPoolConfig::builder()
            .send_threads(1)
            .max_pending(1)
            .build()
            .unwrap();
        let dispatch = Arc::new(PooledDispatch::new(config).unwrap());

        let (done_tx, done_rx) = mpsc::channel();
        let observed = Arc::downgrade(&dispatch);
        let done_tx = std::sync::Mutex::new(done_tx);
        dispatch.set_completion_hook(Arc::new(move || {
            if let Some(dispatch) = observed.upgrade() {
                let _ = done_tx.lock().unwrap().send(dispatch.send_queue_depth());
            }
        }));

        dispatch.try_spawn_send(|| {}).unwrap();
        let depth = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(depth, 0);
        // A hook-driven retry would be accepted at this point.
        assert!(dispatch.try_spawn_send(|| {}).is_ok());
        dispatch.wait_idle();
    }
}
