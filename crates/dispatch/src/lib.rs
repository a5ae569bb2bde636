//! Dispatch trait for executing outbound sends.
//!
//! The sender loop of the network manager decides *what* to send and in which
//! order; a [`Dispatch`] implementation decides *where* each send runs:
//!
//! - [`PooledDispatch`](https://docs.rs/courier-dispatch-pooled) runs sends on a fixed-size rayon pool (default)
//! - [`SpawnDispatch`](https://docs.rs/courier-dispatch-spawn) spawns one OS thread per send (unbounded)
//! - [`SyncDispatch`](https://docs.rs/courier-dispatch-sync) runs sends inline (deterministic tests)
//!
//! Only the *dequeue* order is guaranteed by the manager. Once handed to a
//! dispatch, sends run in parallel and complete in any order.

use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Why a send was not accepted. The closure is dropped unrun in both cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("send pool saturated")]
    Saturated,

    #[error("failed to start send: {0}")]
    Spawn(String),
}

/// Callback run after a send finishes and its in-flight slot is released.
pub type CompletionHook = Arc<dyn Fn() + Send + Sync>;

/// Trait for executing send closures.
///
/// Implementations schedule fire-and-forget closures. Results travel back
/// through callbacks captured in the closures.
pub trait Dispatch: Send + Sync + 'static {
    /// Run a send, queueing it if every worker is busy.
    fn spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError>;

    /// Run a send unless the dispatch is saturated.
    fn try_spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError>;

    /// Sends submitted but not yet finished.
    fn send_queue_depth(&self) -> usize;

    /// Maximum sends allowed in flight, `None` if unbounded.
    fn capacity(&self) -> Option<usize>;

    /// Block until every submitted send has finished.
    fn wait_idle(&self);

    /// Install `hook`, replacing any previous one. Dispatches without a
    /// capacity bound may ignore it.
    fn set_completion_hook(&self, hook: CompletionHook) {
        let _ = hook;
    }
}

/// Counter of in-flight sends that can be waited on.
///
/// Shared by the threaded dispatch implementations.
#[derive(Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
    on_exit: RwLock<Option<CompletionHook>>,
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("count", &self.get())
            .field("has_exit_hook", &self.on_exit.read().is_some())
            .finish()
    }
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one send. The returned guard unregisters it when dropped,
    /// including during unwinding.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard {
            in_flight: Arc::clone(self),
        }
    }

    pub fn get(&self) -> usize {
        *self.count.lock()
    }

    /// Block until the count reaches zero.
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }

    /// Run `hook` after every exit, once the count has been decremented.
    pub fn set_exit_hook(&self, hook: CompletionHook) {
        *self.on_exit.write() = Some(hook);
    }

    fn exit(&self) {
        {
            let mut count = self.count.lock();
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.idle.notify_all();
            }
        }
        let hook = self.on_exit.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Marks one send as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.exit();
    }
}
