//! Node configuration file.

use courier_manager::NetworkManagerConfig;
use courier_services::{LoggingClientConfig, LoggingServerConfig, PingConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Everything a node runs, loaded from one TOML file.
///
/// ```toml
/// log_file = "./output/node.log"
///
/// [manager]
/// block_size = 10
/// worker_count = 4
///
/// [manager.listener]
/// listen_addr = "0.0.0.0:13127"
///
/// [ping]
/// hosts = ["10.0.0.2:13127"]
/// interval_ms = 5000
///
/// [logging_client]
/// server = "10.0.0.1:13127"
/// ```
///
/// A service runs only when its section is present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub manager: NetworkManagerConfig,
    pub ping: Option<PingConfig>,
    pub logging_client: Option<LoggingClientConfig>,
    pub logging_server: Option<LoggingServerConfig>,
    /// Write logs here instead of stdout.
    pub log_file: Option<PathBuf>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, NodeConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| NodeConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| NodeConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
