//! Service registry.

use crate::error::{LifecyclePhase, RegistryError, ServiceLifecycleError};
use crate::outbox::Outbox;
use crate::service::{Service, ServiceContext};
use courier_rpc::HandlerRegistry;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};

/// Services of one manager, keyed by name.
///
/// Services start in name order and stop in reverse name order.
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, Arc<dyn Service>>>,
    outbox: Arc<Outbox>,
    handlers: Arc<HandlerRegistry>,
    listen_addr: Arc<RwLock<Option<SocketAddr>>>,
    span: Span,
}

impl ServiceRegistry {
    pub(crate) fn new(
        outbox: Arc<Outbox>,
        handlers: Arc<HandlerRegistry>,
        listen_addr: Arc<RwLock<Option<SocketAddr>>>,
        span: Span,
    ) -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            outbox,
            handlers,
            listen_addr,
            span,
        }
    }

    /// Register `service`: attach its context, wire its inbound handlers,
    /// and start it right away when `hot_start` is set.
    ///
    /// A name clash fails without touching the registry or the service. A
    /// failed hot start is logged and the service stays registered.
    pub fn add(&self, service: Arc<dyn Service>, hot_start: bool) -> Result<(), RegistryError> {
        let name = service.name().to_string();
        {
            let mut services = self.services.write();
            if services.contains_key(&name) {
                return Err(RegistryError::DuplicateService(name));
            }
            services.insert(name.clone(), service.clone());
        }

        let span = info_span!(parent: &self.span, "service", name = %name);
        service.attach(ServiceContext::new(
            self.outbox.clone(),
            self.listen_addr.clone(),
            service.priority(),
            span,
            Arc::downgrade(&service),
        ));
        service.clone().register_inbound(&self.handlers);

        info!(
            parent: &self.span,
            service = %name,
            priority = %service.priority(),
            "Service registered"
        );

        if hot_start {
            if let Err(e) = Self::start_one(&name, &service) {
                warn!(parent: &self.span, error = %e, "Hot start failed");
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.read().get(name).cloned()
    }

    /// Look up a service by name and downcast it to its concrete type.
    pub fn get_as<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        self.get(name)?.as_any().downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Start every service. Failures are logged and returned; they do not stop
    /// the remaining services from starting.
    pub fn start_all(&self) -> Vec<ServiceLifecycleError> {
        let mut errors = Vec::new();
        for (name, service) in self.snapshot() {
            if let Err(e) = Self::start_one(&name, &service) {
                warn!(parent: &self.span, error = %e, "Service start failed");
                errors.push(e);
            }
        }
        errors
    }

    /// Stop every service, in reverse start order.
    pub fn stop_all(&self) -> Vec<ServiceLifecycleError> {
        let mut errors = Vec::new();
        for (name, service) in self.snapshot().into_iter().rev() {
            if let Err(source) = service.stop() {
                let e = ServiceLifecycleError {
                    service: name,
                    phase: LifecyclePhase::Stop,
                    source,
                };
                warn!(parent: &self.span, error = %e, "Service stop failed");
                errors.push(e);
            }
        }
        errors
    }

    fn start_one(name: &str, service: &Arc<dyn Service>) -> Result<(), ServiceLifecycleError> {
        service.start().map_err(|source| ServiceLifecycleError {
            service: name.to_string(),
            phase: LifecyclePhase::Start,
            source,
        })
    }

    // Hooks run outside the lock so a service may look up its peers.
    fn snapshot(&self) -> Vec<(String, Arc<dyn Service>)> {
        self.services
            .read()
            .iter()
            .map(|(name, service)| (name.clone(), service.clone()))
            .collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
