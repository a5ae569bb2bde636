//! Minimal request/response transport for courier nodes.
//!
//! - [`RpcListener`]: framed TCP server on its own tokio runtime
//! - [`RpcClient`]: blocking client used from send actions
//! - [`HandlerRegistry`]: method name to handler table shared by services
//! - [`wire`]: length-prefixed, versioned, LZ4-compressed JSON frames

mod client;
mod handler_registry;
mod listener;
pub mod wire;

pub use client::{RpcClient, RpcError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
pub use handler_registry::{Handler, HandlerError, HandlerRegistry};
pub use listener::{ListenerConfig, ListenerError, ListenerHandle, RpcListener, DEFAULT_PORT};
pub use wire::{Request, Response, WireError};
