//! Manager, registry and service lifecycle errors.

use courier_dispatch_pooled::ThreadPoolError;
use courier_queue::QueueError;
use courier_rpc::{ListenerError, RpcError};
use std::fmt;
use std::io;
use thiserror::Error;

/// Invalid manager configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from service registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A service named {0:?} is already registered")]
    DuplicateService(String),
}

/// Posting from a service that may not be attached yet.
#[derive(Debug, Error)]
pub enum PostError {
    #[error("Service is not attached to a network manager")]
    Detached,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Failure reported by a service's own start/stop hook.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

/// Lifecycle step during which a service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Start,
    Stop,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Start => f.write_str("start"),
            LifecyclePhase::Stop => f.write_str("stop"),
        }
    }
}

/// A service start or stop hook failed. Logged, never fatal to the manager.
#[derive(Debug, Error)]
#[error("Service {service:?} failed to {phase}: {source}")]
pub struct ServiceLifecycleError {
    pub service: String,
    pub phase: LifecyclePhase,
    #[source]
    pub source: ServiceError,
}

/// Errors from constructing or starting a manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ThreadPool(#[from] ThreadPoolError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Failed to spawn sender thread: {0}")]
    SenderThread(#[source] io::Error),
}
