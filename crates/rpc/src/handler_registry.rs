//! Type-erased handler registry for inbound RPC dispatch.
//!
//! Services register handlers keyed by method name; the listener decodes each
//! request and hands its JSON body to the matching handler.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while handling an inbound request.
///
/// Sent back to the caller as a remote error reply.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Failed(String),
}

/// Type-erased handler: JSON request body in, JSON reply out.
pub type Handler = Arc<dyn Fn(Value) -> Result<Value, HandlerError> + Send + Sync>;

/// Registry of inbound handlers, keyed by method name.
///
/// Registrations are rare, dispatches are frequent.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty handler registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw JSON handler for `method`.
    ///
    /// Returns `false` and leaves the registry untouched if the method already
    /// has a handler, so registering the same service twice is harmless.
    pub fn register<F>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let method = method.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&method) {
            tracing::debug!(method = %method, "Handler already registered");
            return false;
        }
        handlers.insert(method, Arc::new(handler));
        true
    }

    /// Register a typed handler for `method`.
    ///
    /// The request body is decoded into `Req` before the handler runs; decode
    /// failures are answered with [`HandlerError::BadRequest`].
    pub fn register_typed<Req, Resp, F>(&self, method: impl Into<String>, handler: F) -> bool
    where
        Req: DeserializeOwned + 'static,
        Resp: Serialize + 'static,
        F: Fn(Req) -> Result<Resp, HandlerError> + Send + Sync + 'static,
    {
        self.register(method, move |body| {
            let request: Req =
                serde_json::from_value(body).map_err(|e| HandlerError::BadRequest(e.to_string()))?;
            let response = handler(request)?;
            serde_json::to_value(response).map_err(|e| HandlerError::Failed(e.to_string()))
        })
    }

    /// Run the handler registered for `method`.
    ///
    /// The handler is cloned out of the map so the lock is not held while it
    /// runs.
    pub fn dispatch(&self, method: &str, body: Value) -> Result<Value, HandlerError> {
        let handler = self
            .handlers
            .read()
            .get(method)
            .cloned()
            .ok_or_else(|| HandlerError::UnknownMethod(method.to_string()))?;
        handler(body)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        methods.sort();
        methods
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}
