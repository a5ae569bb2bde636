//! Round-trip timing between nodes.
//!
//! Every node running a [`PingService`] answers `debug_ping` calls by echoing
//! the sender's timestamp. Outbound pings record the round-trip time per
//! address once the echo comes back.

use crate::unix_time;
use courier_manager::{ContextCell, PostError, Service, ServiceContext};
use courier_queue::{ActionError, Message, Payload, Priority};
use courier_rpc::{HandlerRegistry, RpcClient};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Span};

/// Inbound method answered by every ping service.
pub const PING_METHOD: &str = "debug_ping";

/// Ping request and reply body: seconds since the Unix epoch at send time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingMessage {
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    pub name: String,
    pub priority: i64,
    /// Hosts to ping (`host:port`).
    pub hosts: Vec<String>,
    /// Ping every host this often; 0 disables periodic pinging.
    pub interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            name: "DebugPing".to_string(),
            priority: 2,
            hosts: Vec::new(),
            interval_ms: 0,
            connect_timeout_ms: 2_000,
            io_timeout_ms: 2_000,
        }
    }
}

/// Round-trip times recorded so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingResults {
    pub rtts: BTreeMap<String, Vec<Duration>>,
    /// Pings posted whose outcome is not known yet.
    pub active: usize,
}

#[derive(Default)]
struct PingState {
    peers: RwLock<BTreeMap<String, Arc<RpcClient>>>,
    rtts: RwLock<BTreeMap<String, Vec<Duration>>>,
    active: AtomicUsize,
}

impl PingState {
    fn finish(&self) {
        // Never wraps below zero even if a result arrives twice.
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn record(&self, address: &str, reply: PingMessage) -> Duration {
        let rtt = Duration::try_from_secs_f64(unix_time() - reply.time).unwrap_or(Duration::ZERO);
        self.rtts
            .write()
            .entry(address.to_string())
            .or_default()
            .push(rtt);
        rtt
    }
}

/// One ping counted in `active` until dropped, whether or not it ever ran.
struct PendingPing(Arc<PingState>);

impl PendingPing {
    fn new(state: &Arc<PingState>) -> Self {
        state.active.fetch_add(1, Ordering::SeqCst);
        Self(state.clone())
    }
}

impl Drop for PendingPing {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Measures round-trip times to a set of hosts.
pub struct PingService {
    config: PingConfig,
    context: ContextCell,
    state: Arc<PingState>,
}

impl PingService {
    pub fn new(config: PingConfig) -> Self {
        let service = Self {
            config,
            context: ContextCell::new(),
            state: Arc::new(PingState::default()),
        };
        service.add_hosts(service.config.hosts.clone());
        service
    }

    pub fn config(&self) -> &PingConfig {
        &self.config
    }

    /// Start tracking `addresses`; known addresses keep their results.
    pub fn add_hosts<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for address in addresses {
            self.peer(&address.into());
        }
    }

    pub fn hosts(&self) -> Vec<String> {
        self.state.peers.read().keys().cloned().collect()
    }

    /// Queue one ping to `address`, tracking it if new.
    pub fn ping(&self, address: &str) -> Result<(), PostError> {
        let client = self.peer(address);

        let request = PingMessage { time: unix_time() };
        let action = move |_payload: Payload| -> Result<Option<Value>, ActionError> {
            let reply = client.call_typed::<_, PingMessage>(PING_METHOD, &request)?;
            Ok(Some(serde_json::to_value(reply)?))
        };

        // The callback owns the pending mark, so a failed, rejected or
        // unqueued message settles it when dropped.
        let pending = PendingPing::new(&self.state);
        let state = self.state.clone();
        let target = address.to_string();
        let message = Message::new(self.priority(), Payload::single(address), action)
            .with_on_result(
                move |result, _context| {
                    drop(pending);
                    let reply: PingMessage = serde_json::from_value(result.unwrap_or_default())?;
                    state.record(&target, reply);
                    Ok(())
                },
                Some(Value::String(address.to_string())),
            );

        self.context.post(message)
    }

    /// Ping every tracked host. Returns how many pings were queued.
    pub fn ping_all(&self) -> usize {
        let mut queued = 0;
        for address in self.hosts() {
            match self.ping(&address) {
                Ok(()) => queued += 1,
                Err(e) => {
                    debug!(parent: &self.span(), address = %address, error = %e, "Ping not queued");
                }
            }
        }
        queued
    }

    pub fn results(&self) -> PingResults {
        PingResults {
            rtts: self.state.rtts.read().clone(),
            active: self.active_pings(),
        }
    }

    pub fn active_pings(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    fn peer(&self, address: &str) -> Arc<RpcClient> {
        if let Some(client) = self.state.peers.read().get(address) {
            return client.clone();
        }
        let mut peers = self.state.peers.write();
        let client = peers.entry(address.to_string()).or_insert_with(|| {
            Arc::new(RpcClient::new(address).with_timeouts(
                Duration::from_millis(self.config.connect_timeout_ms),
                Duration::from_millis(self.config.io_timeout_ms),
            ))
        });
        self.state
            .rtts
            .write()
            .entry(address.to_string())
            .or_default();
        client.clone()
    }

    fn span(&self) -> Span {
        self.context
            .get()
            .map(|ctx| ctx.span().clone())
            .unwrap_or_else(Span::none)
    }
}

impl Default for PingService {
    fn default() -> Self {
        Self::new(PingConfig::default())
    }
}

impl Service for PingService {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn priority(&self) -> Priority {
        Priority::new(self.config.priority)
    }

    fn attach(&self, ctx: ServiceContext) {
        self.context.set(ctx);
    }

    fn register_inbound(self: Arc<Self>, handlers: &HandlerRegistry) {
        handlers.register_typed(PING_METHOD, |ping: PingMessage| Ok(ping));
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
