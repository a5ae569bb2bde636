//! Inbound RPC listener.
//!
//! The listener owns a dedicated tokio multi-thread runtime running on its own
//! OS thread, so inbound traffic never competes with the outbound send pool.
//! Each connection carries a sequence of request frames; every request is
//! answered in order on the same connection.

use crate::handler_registry::HandlerRegistry;
use crate::wire::{self, Request, Response, WireError, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Default inbound port of a node.
pub const DEFAULT_PORT: u16 = 13127;

/// How long shutdown waits for open connections before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Errors from starting the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to build listener runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("Failed to spawn listener thread: {0}")]
    Thread(#[source] io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to accept connections on. Port 0 picks a free port.
    pub listen_addr: SocketAddr,

    /// Tokio worker threads serving inbound requests.
    pub worker_threads: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            worker_threads: 2,
        }
    }
}

impl ListenerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Self::default()
        }
    }

    /// Loopback address with an OS-assigned port.
    pub fn ephemeral() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    pub fn validate(&self) -> Result<(), ListenerError> {
        if self.worker_threads == 0 {
            return Err(ListenerError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Starts listeners.
pub struct RpcListener;

impl RpcListener {
    /// Bind `config.listen_addr` and start serving `handlers`.
    ///
    /// Bind and runtime errors are reported here; the returned handle stops
    /// the listener when dropped.
    pub fn start(
        config: &ListenerConfig,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<ListenerHandle, ListenerError> {
        config.validate()?;

        let bind_err = |source| ListenerError::Bind {
            addr: config.listen_addr,
            source,
        };
        let std_listener = StdTcpListener::bind(config.listen_addr).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = std_listener.local_addr().map_err(bind_err)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("courier-rpc")
            .enable_all()
            .build()
            .map_err(ListenerError::Runtime)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // The runtime is dropped on this thread, never inside another runtime.
        let thread = thread::Builder::new()
            .name("courier-listener".to_string())
            .spawn(move || {
                runtime.block_on(serve(std_listener, handlers, shutdown_rx));
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })
            .map_err(ListenerError::Thread)?;

        info!(addr = %local_addr, workers = config.worker_threads, "RPC listener started");

        Ok(ListenerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Handle to a running listener.
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// The bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop accepting, close connections, and join the listener thread.
    ///
    /// Calling it again is a no-op.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(addr = %self.local_addr, "Listener thread panicked");
            }
            info!(addr = %self.local_addr, "RPC listener stopped");
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    std_listener: StdTcpListener,
    handlers: Arc<HandlerRegistry>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::from_std(std_listener) {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, "Failed to register listener socket");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(stream, peer, handlers.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                }
            },
        }
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, handlers: Arc<HandlerRegistry>) {
    let _ = stream.set_nodelay(true);
    loop {
        let body = match wire::read_frame_async(&mut stream, MAX_FRAME_SIZE).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping connection on bad frame");
                break;
            }
        };

        let response = match wire::decode::<Request>(&body) {
            Ok(request) => handle_request(request, handlers.clone()).await,
            Err(e) => Response::Err(format!("malformed request: {}", e)),
        };

        if let Err(e) = write_response(&mut stream, &response).await {
            debug!(peer = %peer, error = %e, "Failed to write response");
            break;
        }
    }
}

async fn handle_request(request: Request, handlers: Arc<HandlerRegistry>) -> Response {
    let Request { method, body } = request;
    // Handlers are synchronous and may block.
    let outcome =
        tokio::task::spawn_blocking(move || handlers.dispatch(&method, body).map_err(|e| (method, e)))
            .await;

    match outcome {
        Ok(Ok(value)) => Response::Ok(value),
        Ok(Err((method, e))) => {
            debug!(method = %method, error = %e, "Handler returned error");
            Response::Err(e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Handler panicked");
            Response::Err("handler panicked".to_string())
        }
    }
}

async fn write_response(stream: &mut TcpStream, response: &Response) -> Result<(), WireError> {
    let body = wire::encode(response)?;
    wire::write_frame_async(stream, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ListenerConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ListenerConfig {
            worker_threads: 0,
            ..ListenerConfig::ephemeral()
        };
        assert!(matches!(
            RpcListener::start(&config, Arc::new(HandlerRegistry::new())),
            Err(ListenerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ephemeral_port_and_idempotent_stop() {
        let mut handle =
            RpcListener::start(&ListenerConfig::ephemeral(), Arc::new(HandlerRegistry::new()))
                .unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(handle.is_running());

        handle.stop();
        assert!(!handle.is_running());
        handle.stop();
    }

    #[test]
    fn test_bind_conflict_reported() {
        let handle =
            RpcListener::start(&ListenerConfig::ephemeral(), Arc::new(HandlerRegistry::new()))
                .unwrap();
        let taken = ListenerConfig::new(handle.local_addr());

        let err = RpcListener::start(&taken, Arc::new(HandlerRegistry::new())).unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }
}
