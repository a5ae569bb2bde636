//! Thread-per-send dispatch.
//!
//! [`SpawnDispatch`] starts one OS thread for every send. Nothing bounds the
//! number of threads, so a sustained enqueue rate above the remote call rate
//! grows threads without limit. Use [`PooledDispatch`] unless sends are rare
//! and long-blocking.
//!
//! [`PooledDispatch`]: https://docs.rs/courier-dispatch-pooled

use courier_dispatch::{CompletionHook, Dispatch, DispatchError, InFlight};
use std::sync::Arc;
use std::thread;
use tracing::{error, warn};

/// Dispatch that spawns a new thread per send.
#[derive(Debug, Clone)]
pub struct SpawnDispatch {
    in_flight: Arc<InFlight>,
}

impl SpawnDispatch {
    pub fn new() -> Self {
        warn!("Using unbounded thread-per-send dispatch; in-flight sends are not capped");
        Self {
            in_flight: InFlight::new(),
        }
    }
}

impl Default for SpawnDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatch for SpawnDispatch {
    fn spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        let guard = self.in_flight.enter();
        thread::Builder::new()
            .name("courier-send".to_string())
            .spawn(move || {
                let _guard = guard;
                f();
            })
            .map(|_| ())
            .map_err(|e| {
                // The closure and its guard were dropped unrun.
                error!(error = %e, "Failed to spawn send thread");
                DispatchError::Spawn(e.to_string())
            })
    }

    fn try_spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        self.spawn_send(f)
    }

    fn send_queue_depth(&self) -> usize {
        self.in_flight.get()
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn wait_idle(&self) {
        self.in_flight.wait_idle();
    }

    fn set_completion_hook(&self, hook: CompletionHook) {
        self.in_flight.set_exit_hook(hook);
    }
}
