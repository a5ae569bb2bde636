//! Service contract.
//!
//! A service is a named unit that answers inbound calls, posts outbound
//! messages at its own priority, and has start/stop hooks driven by the
//! manager. The manager hands each service a [`ServiceContext`] once, at
//! registration.

use crate::error::{PostError, ServiceError};
use crate::outbox::Outbox;
use courier_queue::{ActionError, Message, Priority, QueueError};
use courier_rpc::HandlerRegistry;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use tracing::Span;

/// A pluggable unit registered with a [`NetworkManager`](crate::NetworkManager).
pub trait Service: Send + Sync + 'static {
    /// Registry key; unique per manager.
    fn name(&self) -> &str;

    /// Default priority of the messages this service posts.
    fn priority(&self) -> Priority;

    /// Receive the manager back-reference. Called once per registration;
    /// implementations keep the first context and ignore later ones.
    fn attach(&self, ctx: ServiceContext);

    /// Register inbound handlers. Registering twice must not add anything,
    /// which [`HandlerRegistry::register`] guarantees by refusing known
    /// method names.
    fn register_inbound(self: Arc<Self>, handlers: &HandlerRegistry) {
        let _ = handlers;
    }

    /// Called when the manager starts, or at registration if it is running.
    /// Must tolerate being called while already started.
    fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Called when the manager stops. Must tolerate being called while
    /// already stopped.
    fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Hook for results of messages this service posted through its
    /// [`ServiceContext`] without a callback of their own.
    fn on_result(&self, result: Option<Value>, context: Option<Value>) -> Result<(), ActionError> {
        let _ = (result, context);
        Ok(())
    }

    /// Typed access through [`ServiceRegistry::get_as`](crate::ServiceRegistry::get_as).
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// What a service may use of its manager.
#[derive(Clone)]
pub struct ServiceContext {
    outbox: Arc<Outbox>,
    listen_addr: Arc<RwLock<Option<SocketAddr>>>,
    priority: Priority,
    span: Span,
    // Weak: services hold their own context.
    service: Weak<dyn Service>,
}

impl ServiceContext {
    pub(crate) fn new(
        outbox: Arc<Outbox>,
        listen_addr: Arc<RwLock<Option<SocketAddr>>>,
        priority: Priority,
        span: Span,
        service: Weak<dyn Service>,
    ) -> Self {
        Self {
            outbox,
            listen_addr,
            priority,
            span,
            service,
        }
    }

    /// Queue an outbound message.
    ///
    /// A message without its own result callback reports to the owning
    /// service's [`Service::on_result`]. Results arriving after the service
    /// was dropped are discarded.
    pub fn post(&self, message: Message) -> Result<(), QueueError> {
        let message = if message.has_on_result() {
            message
        } else {
            let service = self.service.clone();
            message.with_on_result(
                move |result, context| match service.upgrade() {
                    Some(service) => service.on_result(result, context),
                    None => Ok(()),
                },
                None,
            )
        };
        self.outbox.post(message)
    }

    /// The owning service's default priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Address of the manager's inbound listener while it runs.
    pub fn address(&self) -> Option<SocketAddr> {
        *self.listen_addr.read()
    }

    /// Span to log under; a child of the manager span carrying the service name.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("priority", &self.priority)
            .field("address", &self.address())
            .finish()
    }
}

/// Write-once slot for a service's [`ServiceContext`].
#[derive(Debug, Default)]
pub struct ContextCell(OnceLock<ServiceContext>);

impl ContextCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `ctx` unless a context is already set. Returns whether it was stored.
    pub fn set(&self, ctx: ServiceContext) -> bool {
        match self.0.set(ctx) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Service already attached; keeping the first context");
                false
            }
        }
    }

    pub fn get(&self) -> Option<&ServiceContext> {
        self.0.get()
    }

    /// Post through the attached context.
    pub fn post(&self, message: Message) -> Result<(), PostError> {
        self.get().ok_or(PostError::Detached)?.post(message)?;
        Ok(())
    }
}
