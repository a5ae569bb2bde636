//! Services that plug into a [`NetworkManager`](courier_manager::NetworkManager).
//!
//! - [`PingService`]: measures round-trip times to other nodes
//! - [`LoggingClient`] / [`LoggingServer`]: ship log records to a central node

mod logger;
mod ping;

pub use logger::{
    LogAck, LogRecord, LoggingClient, LoggingClientConfig, LoggingServer, LoggingServerConfig,
    DEFAULT_LOG_SERVER_PORT, LOG_METHOD,
};
pub use ping::{PingConfig, PingMessage, PingResults, PingService, PING_METHOD};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, or 0 if the clock is before it.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
