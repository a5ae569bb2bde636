//! A standalone courier node.
//!
//! Loads a [`NodeConfig`], builds a network manager with the services it
//! names, and exposes the pieces the `courier-node` binary drives.

mod config;
mod node;

pub use config::{NodeConfig, NodeConfigError};
pub use node::{Node, NodeError};
