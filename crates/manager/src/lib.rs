//! Priority-aware outbound dispatcher with pluggable inbound services.
//!
//! A [`NetworkManager`] owns one priority queue, a sender loop that drains it
//! in priority order onto a [`Dispatch`](courier_dispatch::Dispatch), an
//! optional inbound RPC listener, and a [`ServiceRegistry`].
//!
//! ```no_run
//! use courier_manager::{NetworkManager, NetworkManagerConfig};
//! use courier_queue::{Message, Payload};
//!
//! let manager = NetworkManager::new(NetworkManagerConfig::default()).unwrap();
//! manager.start().unwrap();
//!
//! manager
//!     .post(Message::new(5, Payload::single("hello"), |payload| {
//!         println!("sending {:?}", payload);
//!         Ok(None)
//!     }))
//!     .unwrap();
//!
//! manager.stop();
//! ```

mod config;
mod dispatch;
mod error;
mod manager;
mod outbox;
mod registry;
mod sender;
mod service;
mod stats;

pub use config::{Backpressure, NetworkManagerConfig, NetworkManagerConfigBuilder};
pub use dispatch::SendDispatch;
pub use error::{
    ConfigError, LifecyclePhase, ManagerError, PostError, RegistryError, ServiceError,
    ServiceLifecycleError,
};
pub use manager::{ManagerState, NetworkManager};
pub use registry::ServiceRegistry;
pub use service::{ContextCell, Service, ServiceContext};
pub use stats::{ManagerStats, StatsSnapshot};
