//! Synchronous inline dispatch for deterministic tests.
//!
//! [`SyncDispatch`] runs every send on the calling thread (the sender loop),
//! in dequeue order. Queue depth is always 0.

use courier_dispatch::{Dispatch, DispatchError};

/// Dispatch that runs sends inline.
///
/// Execution order equals dequeue order, which makes priority behaviour
/// observable in tests without timing assumptions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncDispatch;

impl SyncDispatch {
    pub fn new() -> Self {
        Self
    }
}

impl Dispatch for SyncDispatch {
    fn spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        f();
        Ok(())
    }

    fn try_spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        f();
        Ok(())
    }

    fn send_queue_depth(&self) -> usize {
        0
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn wait_idle(&self) {}
}
