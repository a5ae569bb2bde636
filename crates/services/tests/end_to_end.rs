//! Ping and log shipping between managers over real listeners.

use courier_dispatch::Dispatch;
use courier_dispatch_sync::SyncDispatch;
use courier_manager::{Backpressure, NetworkManager, NetworkManagerConfig};
use courier_queue::{Message, Payload};
use courier_rpc::ListenerConfig;
use courier_services::{
    LoggingClient, LoggingClientConfig, LoggingServer, LoggingServerConfig, PingConfig,
    PingService,
};
use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}

fn listening_manager() -> NetworkManager<SyncDispatch> {
    let config = NetworkManagerConfig::builder()
        .listener(ListenerConfig::ephemeral())
        .build()
        .unwrap();
    NetworkManager::with_dispatch(config, SyncDispatch::new()).unwrap()
}

fn plain_manager() -> NetworkManager<SyncDispatch> {
    let config = NetworkManagerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    NetworkManager::with_dispatch(config, SyncDispatch::new()).unwrap()
}

#[test]
fn test_ping_records_round_trip_time() {
    let remote = listening_manager();
    remote.add_service(Arc::new(PingService::default())).unwrap();
    remote.start().unwrap();
    let target = remote.local_addr().unwrap().to_string();

    let local = listening_manager();
    let ping = Arc::new(PingService::new(PingConfig {
        hosts: vec![target.clone()],
        ..PingConfig::default()
    }));
    local.add_service(ping.clone()).unwrap();
    local.start().unwrap();

    assert_eq!(ping.ping_all(), 1);
    assert!(wait_until(Duration::from_secs(5), || {
        ping.results().rtts[&target].len() == 1
    }));
    assert_eq!(ping.active_pings(), 0);
    assert!(ping.results().rtts[&target][0] < Duration::from_secs(5));

    local.stop();
    remote.stop();
}

#[test]
fn test_ping_unreachable_host_settles_as_failure() {
    // Grab a free port and release it so nothing is listening there.
    let closed = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .to_string();

    let manager = plain_manager();
    let ping = Arc::new(PingService::new(PingConfig {
        connect_timeout_ms: 200,
        ..PingConfig::default()
    }));
    manager.add_service(ping.clone()).unwrap();
    manager.start().unwrap();

    ping.ping(&closed).unwrap();
    assert!(wait_until(Duration::from_secs(5), || manager.stats().failed == 1));
    assert_eq!(ping.active_pings(), 0);
    assert!(ping.results().rtts[&closed].is_empty());
    manager.stop();
}

#[test]
fn test_rejected_pings_do_not_stay_active() {
    let config = NetworkManagerConfig::builder()
        .block_size(0)
        .worker_count(1)
        .max_pending(1)
        .backpressure(Backpressure::Reject)
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    let manager = NetworkManager::new(config).unwrap();
    let ping = Arc::new(PingService::new(PingConfig {
        hosts: vec![
            "10.255.0.1:13127".into(),
            "10.255.0.2:13127".into(),
            "10.255.0.3:13127".into(),
        ],
        ..PingConfig::default()
    }));
    manager.add_service(ping.clone()).unwrap();
    manager.start().unwrap();

    // Occupy the only worker slot.
    let (open, gate) = mpsc::channel::<()>();
    manager
        .post(Message::new(1, Payload::single("hold"), move |_| {
            let _ = gate.recv_timeout(Duration::from_secs(5));
            Ok(None)
        }))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        manager.pending() == 0 && manager.dispatch().send_queue_depth() == 1
    }));

    assert_eq!(ping.ping_all(), 3);
    assert!(wait_until(Duration::from_secs(5), || manager.stats().rejected == 3));
    assert_eq!(ping.active_pings(), 0);

    open.send(()).unwrap();
    manager.stop();
}

#[test]
fn test_records_buffered_at_stop_are_still_delivered() {
    let dir = tempfile::tempdir().unwrap();

    let central = listening_manager();
    let server = Arc::new(
        LoggingServer::new(LoggingServerConfig {
            output_dir: dir.path().to_path_buf(),
            ..LoggingServerConfig::default()
        })
        .unwrap(),
    );
    central.add_service(server.clone()).unwrap();
    central.start().unwrap();

    let node = plain_manager();
    let client = Arc::new(LoggingClient::new(LoggingClientConfig {
        server: central.local_addr().unwrap().to_string(),
        host: Some("node-b".into()),
        stream_max: 2,
        // Never flushes on its own while the test runs.
        flush_interval_ms: 60_000,
        ..LoggingClientConfig::default()
    }));
    node.add_service(client.clone()).unwrap();
    node.start().unwrap();

    // Let the flusher take its first (empty) pass and go to sleep.
    thread::sleep(Duration::from_millis(50));
    for i in 0..5 {
        client.log("late", format!("entry {}", i));
    }
    node.stop();

    assert_eq!(client.buffered(), 0);
    assert!(wait_until(Duration::from_secs(5), || server.records_written() == 5));
    central.stop();

    let host_log = fs::read_to_string(server.host_log_path("node-b")).unwrap();
    assert_eq!(host_log.lines().count(), 5);
}

#[test]
fn test_logs_are_shipped_and_consolidated() {
    let dir = tempfile::tempdir().unwrap();

    let central = listening_manager();
    let server = Arc::new(
        LoggingServer::new(LoggingServerConfig {
            output_dir: dir.path().to_path_buf(),
            ..LoggingServerConfig::default()
        })
        .unwrap(),
    );
    central.add_service(server.clone()).unwrap();
    central.start().unwrap();
    let server_addr = central.local_addr().unwrap().to_string();

    let node = plain_manager();
    let client = Arc::new(LoggingClient::new(LoggingClientConfig {
        server: server_addr,
        host: Some("node-a".into()),
        stream_max: 2,
        flush_interval_ms: 20,
        ..LoggingClientConfig::default()
    }));
    node.add_service(client.clone()).unwrap();
    node.start().unwrap();

    for i in 0..5 {
        client.log("round", format!("entry {}", i));
    }
    assert!(wait_until(Duration::from_secs(5), || server.records_written() == 5));

    node.stop();
    client.log("round", "after stop");
    assert_eq!(client.buffered(), 0);

    central.stop();

    let host_log = fs::read_to_string(server.host_log_path("node-a")).unwrap();
    assert_eq!(host_log.lines().count(), 5);

    let consolidated = fs::read_to_string(server.consolidated_path()).unwrap();
    let lines: Vec<&str> = consolidated.lines().collect();
    assert_eq!(lines.len(), 5);
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
    assert!(lines.iter().all(|l| l.contains("(node-a) <round>")));
}

#[test]
fn test_service_sections_parse_from_toml() {
    let ping: PingConfig = toml::from_str(
        r#"
        hosts = ["10.0.0.2:13127"]
        interval_ms = 5000
        "#,
    )
    .unwrap();
    assert_eq!(ping.name, "DebugPing");
    assert_eq!(ping.hosts.len(), 1);

    let client: LoggingClientConfig = toml::from_str(r#"server = "logs:13173""#).unwrap();
    assert_eq!(client.stream_max, 10_000);
    assert!(!client.stream_max_wait);

    let server: LoggingServerConfig = toml::from_str(r#"consolidate_on_exit = false"#).unwrap();
    assert_eq!(server.consolidated_log_name, "consolidated.log");
}
