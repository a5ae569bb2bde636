//! Blocking RPC client.
//!
//! Send actions run on dispatch worker threads, so the client is synchronous.
//! Idle connections are kept for reuse; a connection that saw any error is
//! discarded rather than returned.

use crate::wire::{self, Request, Response, WireError, MAX_FRAME_SIZE};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read/write timeout per call.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Most idle connections kept per client.
const MAX_IDLE: usize = 4;

/// Errors from an outbound call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no address resolved for {0}")]
    Unresolved(String),

    #[error("call timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("codec error: {0}")]
    Codec(#[source] WireError),

    #[error("remote error: {0}")]
    Remote(String),
}

impl From<WireError> for RpcError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(e) if is_timeout(&e) => RpcError::Timeout,
            WireError::Io(e) => RpcError::Io(e),
            other => RpcError::Codec(other),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Client for one remote address.
#[derive(Debug)]
pub struct RpcClient {
    addr: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    idle: Mutex<Vec<TcpStream>>,
}

impl RpcClient {
    /// Create a client for `addr` (`host:port`). Connects lazily.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Call `method` with a raw JSON body.
    ///
    /// A reused idle connection that fails with an I/O error (the peer closed
    /// or restarted) is dropped and the call is retried once on a new one.
    pub fn call(&self, method: &str, body: Value) -> Result<Value, RpcError> {
        let request = wire::encode(&Request::new(method, body))?;

        let reused = self.idle.lock().pop();
        let (stream, response) = match reused {
            Some(mut stream) => match exchange(&mut stream, &request) {
                Ok(response) => (stream, response),
                Err(RpcError::Io(e)) => {
                    debug!(addr = %self.addr, error = %e, "Idle connection failed; reconnecting");
                    self.exchange_fresh(&request)?
                }
                Err(e) => return Err(e),
            },
            None => self.exchange_fresh(&request)?,
        };

        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push(stream);
        }
        drop(idle);

        match response {
            Response::Ok(value) => Ok(value),
            Response::Err(message) => Err(RpcError::Remote(message)),
        }
    }

    /// Call `method` with a typed request and decode the typed reply.
    pub fn call_typed<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_value(request).map_err(|e| RpcError::Codec(e.into()))?;
        let reply = self.call(method, body)?;
        serde_json::from_value(reply).map_err(|e| RpcError::Codec(e.into()))
    }

    fn exchange_fresh(&self, request: &[u8]) -> Result<(TcpStream, Response), RpcError> {
        let mut stream = self.connect()?;
        let response = exchange(&mut stream, request)?;
        Ok((stream, response))
    }

    fn connect(&self) -> Result<TcpStream, RpcError> {
        let connect_err = |source| RpcError::Connect {
            addr: self.addr.clone(),
            source,
        };

        let mut last_err = None;
        for addr in self.addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout)).map_err(RpcError::Io)?;
                    stream.set_write_timeout(Some(self.io_timeout)).map_err(RpcError::Io)?;
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(connect_err(e)),
            None => Err(RpcError::Unresolved(self.addr.clone())),
        }
    }
}

/// One request/response round on `stream`.
fn exchange(stream: &mut TcpStream, request: &[u8]) -> Result<Response, RpcError> {
    wire::write_frame(stream, request)?;
    let reply = wire::read_frame(stream, MAX_FRAME_SIZE)?;
    Ok(wire::decode(&reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = RpcClient::new(format!("127.0.0.1:{}", port))
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));

        let err = client.call("ping", Value::Null).unwrap_err();
        assert!(matches!(err, RpcError::Connect { .. }));
    }

    #[test]
    fn test_unresolvable_address() {
        let client = RpcClient::new("not an address");
        assert!(client.call("ping", Value::Null).is_err());
    }

    #[test]
    fn test_silent_peer_times_out() {
        // Accepts the connection but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = RpcClient::new(listener.local_addr().unwrap().to_string())
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(100));

        let err = client.call("ping", Value::Null).unwrap_err();
        assert!(matches!(err, RpcError::Timeout));
    }
}
