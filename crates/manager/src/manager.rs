//! The network manager: queue, sender loop, listener and services.

use crate::config::NetworkManagerConfig;
use crate::dispatch::SendDispatch;
use crate::error::{ManagerError, RegistryError};
use crate::outbox::Outbox;
use crate::registry::ServiceRegistry;
use crate::sender::SenderLoop;
use crate::service::Service;
use crate::stats::StatsSnapshot;
use courier_dispatch::Dispatch;
use courier_queue::{Message, QueueError, QueueSnapshot};
use courier_rpc::{HandlerRegistry, ListenerHandle, RpcListener};
use crossbeam::channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, info_span, Span};

// ═══════════════════════════════════════════════════════════════════════════
// Lifecycle state
// ═══════════════════════════════════════════════════════════════════════════

/// Lifecycle of a [`NetworkManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagerState::Stopped => "stopped",
            ManagerState::Starting => "starting",
            ManagerState::Running => "running",
            ManagerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

struct SenderHandle {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

/// Resources that exist only while running.
#[derive(Default)]
struct Running {
    sender: Option<SenderHandle>,
    listener: Option<ListenerHandle>,
}

// ═══════════════════════════════════════════════════════════════════════════
// NetworkManager
// ═══════════════════════════════════════════════════════════════════════════

/// Priority-ordered outbound dispatcher with an inbound service registry.
///
/// Messages posted while stopped stay queued and are sent after the next
/// [`start`](Self::start). Dropping the manager stops it.
///
/// `stop` joins the sender loop and waits for in-flight sends, so it must not
/// be called from inside a send action.
pub struct NetworkManager<D: Dispatch = SendDispatch> {
    config: NetworkManagerConfig,
    outbox: Arc<Outbox>,
    doorbell: Receiver<()>,
    dispatch: Arc<D>,
    handlers: Arc<HandlerRegistry>,
    services: ServiceRegistry,
    listen_addr: Arc<RwLock<Option<SocketAddr>>>,
    state: Mutex<ManagerState>,
    // Held across start, stop and add_service so they never interleave.
    running: Mutex<Running>,
    span: Span,
}

impl NetworkManager<SendDispatch> {
    /// Build a manager whose dispatch follows `config.use_worker_pool`.
    pub fn new(config: NetworkManagerConfig) -> Result<Self, ManagerError> {
        config.validate()?;
        let dispatch = SendDispatch::from_config(&config)?;
        Self::with_dispatch(config, dispatch)
    }
}

impl<D: Dispatch> NetworkManager<D> {
    /// Build a manager running its sends on `dispatch`.
    pub fn with_dispatch(config: NetworkManagerConfig, dispatch: D) -> Result<Self, ManagerError> {
        Self::with_span(config, dispatch, info_span!("network_manager"))
    }

    /// Build a manager that logs under `span`.
    pub fn with_span(
        config: NetworkManagerConfig,
        dispatch: D,
        span: Span,
    ) -> Result<Self, ManagerError> {
        config.validate()?;

        let (outbox, doorbell) = Outbox::new(config.build_queue());
        let outbox = Arc::new(outbox);
        let handlers = Arc::new(HandlerRegistry::new());
        let listen_addr = Arc::new(RwLock::new(None));
        let services = ServiceRegistry::new(
            outbox.clone(),
            handlers.clone(),
            listen_addr.clone(),
            span.clone(),
        );

        // A freed worker slot may unblock a saturated sender loop.
        let wake = outbox.clone();
        dispatch.set_completion_hook(Arc::new(move || wake.ring()));

        info!(
            parent: &span,
            block_size = config.block_size,
            order = %config.priority_order,
            restricted = outbox.queue.is_restricted(),
            capacity = ?dispatch.capacity(),
            "Network manager created"
        );

        Ok(Self {
            config,
            outbox,
            doorbell,
            dispatch: Arc::new(dispatch),
            handlers,
            services,
            listen_addr,
            state: Mutex::new(ManagerState::Stopped),
            running: Mutex::new(Running::default()),
            span,
        })
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Start the listener (if configured), the sender loop and all services.
    ///
    /// A no-op when already running. Service start failures are logged and do
    /// not fail the manager.
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut running = self.running.lock();
        {
            let mut state = self.state.lock();
            if *state != ManagerState::Stopped {
                debug!(parent: &self.span, state = %*state, "Start ignored");
                return Ok(());
            }
            *state = ManagerState::Starting;
        }
        info!(parent: &self.span, "Network manager starting");

        if let Err(e) = self.start_resources(&mut running) {
            if let Some(mut listener) = running.listener.take() {
                listener.stop();
            }
            *self.listen_addr.write() = None;
            *self.state.lock() = ManagerState::Stopped;
            error!(parent: &self.span, error = %e, "Network manager failed to start");
            return Err(e);
        }

        let failures = self.services.start_all();
        *self.state.lock() = ManagerState::Running;

        info!(
            parent: &self.span,
            services = self.services.len(),
            failed_services = failures.len(),
            pending = self.outbox.queue.len(),
            address = ?self.local_addr(),
            "Network manager started"
        );
        Ok(())
    }

    fn start_resources(&self, running: &mut Running) -> Result<(), ManagerError> {
        if let Some(listener_config) = &self.config.listener {
            let listener = RpcListener::start(listener_config, self.handlers.clone())?;
            *self.listen_addr.write() = Some(listener.local_addr());
            running.listener = Some(listener);
        }

        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(1);
        let sender_loop = SenderLoop {
            outbox: self.outbox.clone(),
            dispatch: self.dispatch.clone(),
            block_size: self.config.block_size,
            poll_interval: self.config.poll_interval(),
            backpressure: self.config.backpressure,
            doorbell: self.doorbell.clone(),
            shutdown: shutdown_rx,
            span: self.span.clone(),
        };
        let thread = thread::Builder::new()
            .name("courier-sender".to_string())
            .spawn(move || sender_loop.run())
            .map_err(ManagerError::SenderThread)?;

        running.sender = Some(SenderHandle {
            shutdown: shutdown_tx,
            thread,
        });
        Ok(())
    }

    /// Stop the sender loop, wait for in-flight sends, stop the listener and
    /// all services.
    ///
    /// A silent no-op when already stopped. Queued messages are kept.
    pub fn stop(&self) {
        let mut running = self.running.lock();
        {
            let mut state = self.state.lock();
            if *state == ManagerState::Stopped {
                return;
            }
            *state = ManagerState::Stopping;
        }
        info!(parent: &self.span, "Network manager stopping");

        if let Some(sender) = running.sender.take() {
            let _ = sender.shutdown.send(());
            if sender.thread.join().is_err() {
                error!(parent: &self.span, "Sender loop panicked");
            }
        }

        self.dispatch.wait_idle();

        if let Some(mut listener) = running.listener.take() {
            listener.stop();
        }
        *self.listen_addr.write() = None;

        let failures = self.services.stop_all();
        *self.state.lock() = ManagerState::Stopped;

        info!(
            parent: &self.span,
            pending = self.outbox.queue.len(),
            failed_services = failures.len(),
            "Network manager stopped"
        );
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ManagerState::Running
    }

    // ─── Outbound ───────────────────────────────────────────────────────────

    /// Queue a message for sending.
    ///
    /// Fails only when the queue is restricted to known priorities and the
    /// message's priority is not one of them.
    pub fn post(&self, message: Message) -> Result<(), QueueError> {
        self.outbox.post(message)
    }

    pub fn has_messages(&self) -> bool {
        !self.outbox.queue.is_empty()
    }

    /// Messages waiting in the queue (not yet handed to the dispatch).
    pub fn pending(&self) -> usize {
        self.outbox.queue.len()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.outbox.queue.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.outbox.stats.snapshot()
    }

    // ─── Services ───────────────────────────────────────────────────────────

    /// Register a service. Started immediately if the manager is running.
    pub fn add_service<S: Service>(&self, service: Arc<S>) -> Result<(), RegistryError> {
        self.add_service_dyn(service)
    }

    pub fn add_service_dyn(&self, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        let _running = self.running.lock();
        let hot_start = self.state() == ManagerState::Running;
        self.services.add(service, hot_start)
    }

    pub fn get_service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name)
    }

    /// Look up a service by name as its concrete type.
    pub fn get_service_as<S: Service>(&self, name: &str) -> Option<Arc<S>> {
        self.services.get_as::<S>(name)
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Inbound handlers served by the listener.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    /// Bound listener address while running with a listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.read()
    }

    pub fn config(&self) -> &NetworkManagerConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &D {
        &self.dispatch
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl<D: Dispatch> Drop for NetworkManager<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<D: Dispatch> fmt::Debug for NetworkManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkManager")
            .field("state", &self.state())
            .field("pending", &self.pending())
            .field("services", &self.services.names())
            .field("address", &self.local_addr())
            .finish()
    }
}
