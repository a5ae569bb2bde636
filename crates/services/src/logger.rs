//! Log shipping between nodes.
//!
//! [`LoggingClient`] buffers records locally and ships them to a central
//! [`LoggingServer`] as stream messages through the manager queue. The server
//! appends them to one file per host and, on stop, merges every host file
//! into a single timestamp-sorted log.

use crate::unix_time;
use courier_manager::{ContextCell, Service, ServiceContext, ServiceError};
use courier_queue::{Message, Payload, Priority};
use courier_rpc::{HandlerRegistry, RpcClient};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn, Span};

/// Inbound method served by [`LoggingServer`].
pub const LOG_METHOD: &str = "send_log_messages";

/// Default port of a standalone log server.
pub const DEFAULT_LOG_SERVER_PORT: u16 = 13173;

/// One shipped log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Seconds since the Unix epoch, fixed precision so lines sort by time.
    pub timestamp: String,
    pub host: String,
    pub category: String,
    pub content: String,
}

impl LogRecord {
    pub fn new(host: impl Into<String>, category: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            timestamp: format!("{:.10}", unix_time()),
            host: host.into(),
            category: category.into(),
            content: content.into(),
        }
    }

    /// `[timestamp] (host) <category> "content"`
    pub fn line(&self) -> String {
        format!(
            "[{}] ({}) <{}> \"{}\"",
            self.timestamp, self.host, self.category, self.content
        )
    }
}

/// Reply to a shipped stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogAck {
    pub received: usize,
}

/// A background thread with a shutdown signal.
struct Worker {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn spawn(name: &str, run: impl FnOnce(Receiver<()>) + Send + 'static) -> io::Result<Self> {
        let (shutdown, shutdown_rx) = channel::bounded(1);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(shutdown_rx))?;
        Ok(Self { shutdown, thread })
    }

    fn stop(self) -> thread::Result<()> {
        let _ = self.shutdown.send(());
        self.thread.join()
    }
}

fn context_span(context: &ContextCell) -> Span {
    context
        .get()
        .map(|ctx| ctx.span().clone())
        .unwrap_or_else(Span::none)
}

// ═══════════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingClientConfig {
    pub name: String,
    pub priority: i64,
    /// Log server address (`host:port`).
    pub server: String,
    /// Host name stamped on records; defaults to the manager's listen address.
    pub host: Option<String>,
    /// Most records per stream message.
    pub stream_max: usize,
    /// Wait a full interval even after sending a full stream.
    pub stream_max_wait: bool,
    pub flush_interval_ms: u64,
}

impl Default for LoggingClientConfig {
    fn default() -> Self {
        Self {
            name: "logging_client".to_string(),
            priority: 2,
            server: format!("localhost:{}", DEFAULT_LOG_SERVER_PORT),
            host: None,
            stream_max: 10_000,
            stream_max_wait: false,
            flush_interval_ms: 1_000,
        }
    }
}

/// Ships log records to a [`LoggingServer`].
///
/// Records logged while the client is stopped are dropped.
pub struct LoggingClient {
    config: LoggingClientConfig,
    context: ContextCell,
    client: Arc<RpcClient>,
    records_tx: Sender<LogRecord>,
    records_rx: Receiver<LogRecord>,
    worker: Mutex<Option<Worker>>,
}

impl LoggingClient {
    pub fn new(config: LoggingClientConfig) -> Self {
        let client = Arc::new(RpcClient::new(config.server.clone()));
        let (records_tx, records_rx) = channel::unbounded();
        Self {
            config,
            context: ContextCell::new(),
            client,
            records_tx,
            records_rx,
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LoggingClientConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Buffer a record for shipping.
    pub fn log(&self, category: impl Into<String>, content: impl Into<String>) {
        if !self.is_running() {
            debug!(parent: &context_span(&self.context), "Logging client not running; record dropped");
            return;
        }
        let record = LogRecord::new(self.host(), category, content);
        let _ = self.records_tx.send(record);
    }

    /// Records buffered and not yet posted.
    pub fn buffered(&self) -> usize {
        self.records_rx.len()
    }

    fn host(&self) -> String {
        if let Some(host) = &self.config.host {
            return host.clone();
        }
        self.context
            .get()
            .and_then(ServiceContext::address)
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// State moved onto the flush thread.
struct Flusher {
    context: ServiceContext,
    client: Arc<RpcClient>,
    records: Receiver<LogRecord>,
    stream_max: usize,
    stream_max_wait: bool,
    interval: Duration,
}

impl Flusher {
    fn run(self, shutdown: Receiver<()>) {
        debug!(parent: self.context.span(), "Log flusher entering");
        loop {
            let sent = self.flush();
            let full = sent >= self.stream_max;

            if full && !self.stream_max_wait {
                if shutdown.try_recv().is_ok() {
                    break;
                }
                continue;
            }

            let stop = channel::select! {
                recv(shutdown) -> _ => true,
                default(self.interval) => false,
            };
            if stop {
                break;
            }
        }

        // The sender loop has already stopped, so the rest ships inline.
        let shipped = self.ship_remaining();
        debug!(parent: self.context.span(), shipped, "Log flusher exiting");
    }

    /// Take up to `stream_max` buffered records as one stream payload.
    fn take_batch(&self) -> Option<(usize, Payload)> {
        let batch: Vec<LogRecord> = self.records.try_iter().take(self.stream_max).collect();
        if batch.is_empty() {
            return None;
        }
        let count = batch.len();
        let items = batch.iter().filter_map(|r| serde_json::to_value(r).ok());
        Some((count, Payload::stream(items)))
    }

    /// Post up to `stream_max` buffered records as one stream message.
    fn flush(&self) -> usize {
        let Some((count, payload)) = self.take_batch() else {
            return 0;
        };

        let client = self.client.clone();
        let message = Message::new(self.context.priority(), payload, move |payload| {
            let reply = client.call(LOG_METHOD, payload.into_value())?;
            Ok(Some(reply))
        });

        if let Err(e) = self.context.post(message) {
            warn!(parent: self.context.span(), error = %e, dropped = count, "Failed to queue log stream");
        }
        count
    }

    /// Send every buffered record on this thread. Returns how many were sent.
    fn ship_remaining(&self) -> usize {
        let mut shipped = 0;
        while let Some((count, payload)) = self.take_batch() {
            match self.client.call(LOG_METHOD, payload.into_value()) {
                Ok(_) => shipped += count,
                Err(e) => {
                    warn!(parent: self.context.span(), error = %e, dropped = count, "Failed to ship log stream on stop");
                }
            }
        }
        shipped
    }
}

impl Default for LoggingClient {
    fn default() -> Self {
        Self::new(LoggingClientConfig::default())
    }
}

impl Service for LoggingClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn priority(&self) -> Priority {
        Priority::new(self.config.priority)
    }

    fn attach(&self, ctx: ServiceContext) {
        self.context.set(ctx);
    }

    fn start(&self) -> Result<(), ServiceError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let context = self
            .context
            .get()
            .cloned()
            .ok_or_else(|| ServiceError::Failed("logging client is not attached".into()))?;

        let flusher = Flusher {
            context,
            client: self.client.clone(),
            records: self.records_rx.clone(),
            stream_max: self.config.stream_max.max(1),
            stream_max_wait: self.config.stream_max_wait,
            interval: Duration::from_millis(self.config.flush_interval_ms),
        };
        *worker = Some(Worker::spawn("courier-log-client", move |shutdown| {
            flusher.run(shutdown)
        })?);

        info!(parent: &context_span(&self.context), server = %self.config.server, "Logging client started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ServiceError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        if worker.stop().is_err() {
            return Err(ServiceError::Failed("log flusher panicked".into()));
        }
        info!(parent: &context_span(&self.context), "Logging client stopped");
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Server
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingServerConfig {
    pub name: String,
    pub priority: i64,
    pub output_dir: PathBuf,
    pub consolidated_log_name: String,
    pub consolidate_on_exit: bool,
}

impl Default for LoggingServerConfig {
    fn default() -> Self {
        Self {
            name: "logging_server".to_string(),
            priority: 2,
            output_dir: PathBuf::from("./output/logging"),
            consolidated_log_name: "consolidated.log".to_string(),
            consolidate_on_exit: true,
        }
    }
}

/// Receives shipped records and writes them to per-host files.
///
/// Streams received while stopped are buffered and written after start.
pub struct LoggingServer {
    config: LoggingServerConfig,
    context: ContextCell,
    batches_tx: Sender<Vec<LogRecord>>,
    batches_rx: Receiver<Vec<LogRecord>>,
    written: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
}

impl LoggingServer {
    /// Create the server and its output directory.
    pub fn new(config: LoggingServerConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.output_dir)?;
        let (batches_tx, batches_rx) = channel::unbounded();
        Ok(Self {
            config,
            context: ContextCell::new(),
            batches_tx,
            batches_rx,
            written: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &LoggingServerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Records written to host files so far.
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.config.output_dir.join(&self.config.consolidated_log_name)
    }

    /// Path of the file holding `host`'s records.
    pub fn host_log_path(&self, host: &str) -> PathBuf {
        host_log_path(&self.config.output_dir, host)
    }

    /// Merge every host file into the consolidated log, sorted by timestamp.
    ///
    /// Returns the number of lines written; an empty merge leaves any existing
    /// consolidated log untouched.
    pub fn consolidate(&self) -> io::Result<usize> {
        consolidate(&self.config.output_dir, &self.consolidated_path())
    }
}

fn host_log_path(dir: &Path, host: &str) -> PathBuf {
    let file: String = host
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    dir.join(format!("{}.log", file))
}

fn consolidate(dir: &Path, consolidated: &Path) -> io::Result<usize> {
    let mut lines = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path == consolidated || !path.is_file() {
            continue;
        }
        for line in BufReader::new(File::open(&path)?).lines() {
            lines.push(line?);
        }
    }
    if lines.is_empty() {
        return Ok(0);
    }

    // Lines start with the fixed-precision timestamp.
    lines.sort();
    let mut out = BufWriter::new(File::create(consolidated)?);
    for line in &lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(lines.len())
}

/// Owned by the writer thread.
struct HostWriter {
    dir: PathBuf,
    files: HashMap<String, BufWriter<File>>,
    written: Arc<AtomicU64>,
    span: Span,
}

impl HostWriter {
    fn write_batch(&mut self, batch: Vec<LogRecord>) {
        for record in batch {
            if let Err(e) = self.write_record(&record) {
                warn!(parent: &self.span, host = %record.host, error = %e, "Failed to write log record");
            }
        }
        for file in self.files.values_mut() {
            let _ = file.flush();
        }
    }

    fn write_record(&mut self, record: &LogRecord) -> io::Result<()> {
        if !self.files.contains_key(&record.host) {
            let path = host_log_path(&self.dir, &record.host);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(parent: &self.span, host = %record.host, path = %path.display(), "Opened host log");
            self.files.insert(record.host.clone(), BufWriter::new(file));
        }
        if let Some(file) = self.files.get_mut(&record.host) {
            writeln!(file, "{}", record.line())?;
            self.written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Service for LoggingServer {
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
        let batches = self.batches_tx.clone();
        handlers.register_typed(LOG_METHOD, move |records: Vec<LogRecord>| {
            let received = records.len();
            if received > 0 {
                let _ = batches.send(records);
            }
            Ok(LogAck { received })
        });
    }

    fn start(&self) -> Result<(), ServiceError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        fs::create_dir_all(&self.config.output_dir)?;

        let span = context_span(&self.context);
        let mut writer = HostWriter {
            dir: self.config.output_dir.clone(),
            files: HashMap::new(),
            written: self.written.clone(),
            span: span.clone(),
        };
        let batches = self.batches_rx.clone();
        let consolidate_on_exit = self.config.consolidate_on_exit;
        let consolidated = self.consolidated_path();

        *worker = Some(Worker::spawn("courier-log-server", move |shutdown| {
            loop {
                let batch = channel::select! {
                    recv(batches) -> batch => batch.ok(),
                    recv(shutdown) -> _ => None,
                };
                match batch {
                    Some(batch) => writer.write_batch(batch),
                    None => break,
                }
            }
            for batch in batches.try_iter() {
                writer.write_batch(batch);
            }
            // Close host files before reading them back.
            drop(std::mem::take(&mut writer.files));

            if consolidate_on_exit {
                match consolidate(&writer.dir, &consolidated) {
                    Ok(lines) => {
                        info!(parent: &writer.span, lines, path = %consolidated.display(), "Consolidated logs")
                    }
                    Err(e) => warn!(parent: &writer.span, error = %e, "Log consolidation failed"),
                }
            }
        })?);

        info!(parent: &span, dir = %self.config.output_dir.display(), "Logging server started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ServiceError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        if worker.stop().is_err() {
            return Err(ServiceError::Failed("log writer panicked".into()));
        }
        info!(parent: &context_span(&self.context), written = self.records_written(), "Logging server stopped");
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: &str, host: &str, content: &str) -> LogRecord {
        LogRecord {
            timestamp: timestamp.to_string(),
            host: host.to_string(),
            category: "test".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_line_format() {
        let line = record("1.5000000000", "node-a", "hello").line();
        assert_eq!(line, "[1.5000000000] (node-a) <test> \"hello\"");
    }

    #[test]
    fn test_timestamp_precision() {
        let record = LogRecord::new("h", "c", "x");
        let (_, fraction) = record.timestamp.split_once('.').unwrap();
        assert_eq!(fraction.len(), 10);
    }

    #[test]
    fn test_host_path_is_confined_to_dir() {
        let path = host_log_path(Path::new("/logs"), "../etc/passwd");
        assert_eq!(path, PathBuf::from("/logs/.._etc_passwd.log"));
    }

    #[test]
    fn test_consolidate_sorts_and_skips_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.log"), "[2.0] (b) <c> \"two\"\n[4.0] (b) <c> \"four\"\n").unwrap();
        fs::write(dir.path().join("a.log"), "[1.0] (a) <c> \"one\"\n[3.0] (a) <c> \"three\"\n").unwrap();
        let consolidated = dir.path().join("consolidated.log");
        fs::write(&consolidated, "[0.0] (stale) <c> \"old\"\n").unwrap();

        assert_eq!(consolidate(dir.path(), &consolidated).unwrap(), 4);
        let merged = fs::read_to_string(&consolidated).unwrap();
        let contents: Vec<&str> = merged.lines().collect();
        assert_eq!(contents.len(), 4);
        assert!(contents[0].contains("one"));
        assert!(contents[3].contains("four"));
    }

    #[test]
    fn test_consolidate_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let consolidated = dir.path().join("consolidated.log");
        assert_eq!(consolidate(dir.path(), &consolidated).unwrap(), 0);
        assert!(!consolidated.exists());
    }

    #[test]
    fn test_log_dropped_while_stopped() {
        let client = LoggingClient::default();
        client.log("boot", "ignored");
        assert_eq!(client.buffered(), 0);
    }

    #[test]
    fn test_client_start_requires_attach() {
        let client = LoggingClient::default();
        assert!(client.start().is_err());
        assert!(!client.is_running());
        client.stop().unwrap();
    }
}
