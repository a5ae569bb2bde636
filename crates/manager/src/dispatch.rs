//! Dispatch selected from configuration.

use crate::config::NetworkManagerConfig;
use courier_dispatch::{CompletionHook, Dispatch, DispatchError};
use courier_dispatch_pooled::{PooledDispatch, ThreadPoolError};
use courier_dispatch_spawn::SpawnDispatch;

/// The dispatch a manager built from configuration runs its sends on:
/// the bounded pool when `use_worker_pool` is set, otherwise one thread per
/// message.
#[derive(Debug)]
pub enum SendDispatch {
    Pooled(PooledDispatch),
    Spawn(SpawnDispatch),
}

impl SendDispatch {
    pub fn from_config(config: &NetworkManagerConfig) -> Result<Self, ThreadPoolError> {
        if config.use_worker_pool {
            Ok(Self::Pooled(PooledDispatch::new(config.send_pool_config())?))
        } else {
            Ok(Self::Spawn(SpawnDispatch::new()))
        }
    }
}

impl Dispatch for SendDispatch {
    fn spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        match self {
            Self::Pooled(d) => d.spawn_send(f),
            Self::Spawn(d) => d.spawn_send(f),
        }
    }

    fn try_spawn_send(&self, f: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        match self {
            Self::Pooled(d) => d.try_spawn_send(f),
            Self::Spawn(d) => d.try_spawn_send(f),
        }
    }

    fn send_queue_depth(&self) -> usize {
        match self {
            Self::Pooled(d) => d.send_queue_depth(),
            Self::Spawn(d) => d.send_queue_depth(),
        }
    }

    fn capacity(&self) -> Option<usize> {
        match self {
            Self::Pooled(d) => d.capacity(),
            Self::Spawn(d) => d.capacity(),
        }
    }

    fn wait_idle(&self) {
        match self {
            Self::Pooled(d) => d.wait_idle(),
            Self::Spawn(d) => d.wait_idle(),
        }
    }

    fn set_completion_hook(&self, hook: CompletionHook) {
        match self {
            Self::Pooled(d) => d.set_completion_hook(hook),
            Self::Spawn(d) => d.set_completion_hook(hook),
        }
    }
}
