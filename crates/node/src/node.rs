//! Assembles a network manager and the services named in its configuration.

use crate::config::NodeConfig;
use courier_manager::{ManagerError, NetworkManager, RegistryError};
use courier_rpc::ListenerConfig;
use courier_services::{LoggingClient, LoggingServer, PingService};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to prepare log output directory: {0}")]
    LogOutput(#[source] io::Error),
}

/// A running (or runnable) node.
pub struct Node {
    manager: NetworkManager,
    ping: Option<Arc<PingService>>,
    logging_client: Option<Arc<LoggingClient>>,
    logging_server: Option<Arc<LoggingServer>>,
}

impl Node {
    /// Build the manager and register the configured services. Nothing runs
    /// until [`start`](Self::start).
    ///
    /// A node always accepts inbound calls; without a `[manager.listener]`
    /// section it listens on the default address.
    pub fn build(mut config: NodeConfig) -> Result<Self, NodeError> {
        if config.manager.listener.is_none() {
            config.manager.listener = Some(ListenerConfig::default());
        }
        let manager = NetworkManager::new(config.manager)?;

        let logging_server = match config.logging_server {
            Some(cfg) => {
                let server = Arc::new(LoggingServer::new(cfg).map_err(NodeError::LogOutput)?);
                manager.add_service(server.clone())?;
                Some(server)
            }
            None => None,
        };

        let logging_client = match config.logging_client {
            Some(cfg) => {
                let client = Arc::new(LoggingClient::new(cfg));
                manager.add_service(client.clone())?;
                Some(client)
            }
            None => None,
        };

        let ping = match config.ping {
            Some(cfg) => {
                let ping = Arc::new(PingService::new(cfg));
                manager.add_service(ping.clone())?;
                Some(ping)
            }
            None => None,
        };

        info!(
            parent: manager.span(),
            services = ?manager.services().names(),
            "Node assembled"
        );

        Ok(Self {
            manager,
            ping,
            logging_client,
            logging_server,
        })
    }

    pub fn start(&self) -> Result<(), NodeError> {
        self.manager.start()?;
        if let Some(client) = &self.logging_client {
            let addr = self
                .manager
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default();
            client.log("node", format!("started, listening on {}", addr));
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.manager.stop();
    }

    pub fn manager(&self) -> &NetworkManager {
        &self.manager
    }

    pub fn ping(&self) -> Option<&Arc<PingService>> {
        self.ping.as_ref()
    }

    pub fn logging_client(&self) -> Option<&Arc<LoggingClient>> {
        self.logging_client.as_ref()
    }

    pub fn logging_server(&self) -> Option<&Arc<LoggingServer>> {
        self.logging_server.as_ref()
    }

    /// How often to ping every known host, if periodic pinging is enabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        let ping = self.ping.as_ref()?;
        match ping.config().interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_services::{LoggingServerConfig, PingConfig};

    fn ephemeral() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.manager.listener = Some(ListenerConfig::ephemeral());
        config
    }

    #[test]
    fn test_bare_node_gets_default_listener() {
        let node = Node::build(NodeConfig::default()).unwrap();
        assert_eq!(
            node.manager().config().listener,
            Some(ListenerConfig::default())
        );
        assert!(node.manager().services().is_empty());
        assert!(node.ping_interval().is_none());
    }

    #[test]
    fn test_sections_become_services() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ephemeral();
        config.ping = Some(PingConfig {
            interval_ms: 250,
            ..PingConfig::default()
        });
        config.logging_server = Some(LoggingServerConfig {
            output_dir: dir.path().join("logs"),
            ..LoggingServerConfig::default()
        });

        let node = Node::build(config).unwrap();
        assert_eq!(
            node.manager().services().names(),
            vec!["DebugPing".to_string(), "logging_server".to_string()]
        );
        assert!(dir.path().join("logs").is_dir());
        assert_eq!(node.ping_interval(), Some(Duration::from_millis(250)));
        assert!(node.logging_client().is_none());
    }

    #[test]
    fn test_start_and_stop() {
        let mut config = ephemeral();
        config.ping = Some(PingConfig::default());
        let node = Node::build(config).unwrap();

        node.start().unwrap();
        assert!(node.manager().is_running());
        assert!(node.manager().local_addr().is_some());
        node.stop();
        assert!(!node.manager().is_running());
    }

    #[test]
    fn test_invalid_manager_config_is_rejected() {
        let mut config = ephemeral();
        config.manager.worker_count = 0;
        assert!(matches!(
            Node::build(config),
            Err(NodeError::Manager(ManagerError::Config(_)))
        ));
    }
}
