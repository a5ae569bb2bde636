//! Courier node
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! courier-node --config node.toml
//!
//! # Override the listen address and add ping targets
//! courier-node --config node.toml --listen 0.0.0.0:14000 --ping 10.0.0.2:13127
//! ```
//!
//! See [`NodeConfig`] for the file format.

use anyhow::{Context, Result};
use clap::Parser;
use courier_node::{Node, NodeConfig};
use courier_rpc::ListenerConfig;
use courier_services::PingConfig;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Courier node
///
/// Runs a priority-ordered outbound dispatcher with inbound services.
#[derive(Parser, Debug)]
#[command(name = "courier-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Inbound listen address (overrides config)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Host to ping (can be specified multiple times; enables the ping service)
    #[arg(long)]
    ping: Vec<String>,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to log file (redirects all logs to this file)
    #[arg(long)]
    logfile: Option<PathBuf>,
}

fn apply_overrides(config: &mut NodeConfig, cli: &Cli) {
    if let Some(addr) = cli.listen {
        let listener = config.manager.listener.get_or_insert_with(ListenerConfig::default);
        listener.listen_addr = addr;
    }

    if !cli.ping.is_empty() {
        config
            .ping
            .get_or_insert_with(PingConfig::default)
            .hosts
            .extend(cli.ping.iter().cloned());
    }

    if let Some(ref logfile) = cli.logfile {
        config.log_file = Some(logfile.clone());
    }
}

/// Install the global subscriber. The returned guard flushes file output on drop.
fn init_logging(
    log_file: Option<&Path>,
    log_level: &str,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt();

    let Some(log_file) = log_file else {
        builder.with_env_filter(filter()).init();
        return Ok(None);
    };

    let directory = log_file.parent().unwrap_or(Path::new(".")).to_path_buf();
    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid log file name"))?
        .to_string_lossy()
        .to_string();

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    builder
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_env_filter(filter())
        .init();
    Ok(Some(guard))
}

/// Block until Ctrl+C or SIGTERM, pinging on the configured interval meanwhile.
async fn run_until_shutdown(node: &Node) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let pinger = async {
        match (node.ping(), node.ping_interval()) {
            (Some(ping), Some(every)) => {
                let mut ticker = tokio::time::interval(every);
                loop {
                    ticker.tick().await;
                    let queued = ping.ping_all();
                    tracing::debug!(queued, "Pinged known hosts");
                }
            }
            _ => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = pinger => {}
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path).context("Failed to load configuration")?,
        None => NodeConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    let _log_guard = init_logging(config.log_file.as_deref(), &cli.log_level)?;

    info!("Courier node starting...");

    let node = Node::build(config).context("Failed to build node")?;
    node.start().context("Failed to start node")?;

    if let Some(addr) = node.manager().local_addr() {
        info!(listen_addr = %addr, "Node started, press Ctrl+C to stop");
    }

    // The manager owns its own threads; this runtime only waits for signals.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    runtime.block_on(run_until_shutdown(&node));
    drop(runtime);

    info!("Initiating graceful shutdown...");
    node.stop();

    if let Some(ping) = node.ping() {
        for (host, rtts) in ping.results().rtts {
            if let Some(last) = rtts.last() {
                info!(host = %host, samples = rtts.len(), last_rtt = ?last, "Ping summary");
            }
        }
    }

    info!("Node shutdown complete");
    Ok(())
}
