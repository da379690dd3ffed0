//! Tests for Server
//!
//! These tests verify:
//! - Start/stop lifecycle and setup failures
//! - The connect gate
//! - `update` dispatch limits and ordering
//! - `message_client` / `message_all` delivery and dead-connection cleanup
//! - Weak back-references from queued messages

use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use framelink::{Client, Config, Connection, LinkError, Message, Role, Server, ServerHandler};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Helper Functions
// =============================================================================

/// Handler that records every hook invocation
struct RecordingHandler {
    accept: bool,
    connected: AtomicUsize,
    disconnected: Mutex<Vec<u32>>,
    received: Mutex<Vec<(Option<u32>, Message<u32>)>>,
}

impl RecordingHandler {
    fn new(accept: bool) -> Self {
        Self {
            accept,
            connected: AtomicUsize::new(0),
            disconnected: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        }
    }
}

impl ServerHandler<u32> for RecordingHandler {
    fn on_client_connected(&self, _connection: &Arc<Connection<u32>>) -> bool {
        self.connected.fetch_add(1, Ordering::SeqCst);
        self.accept
    }

    fn on_client_disconnected(&self, connection: &Arc<Connection<u32>>) {
        self.disconnected.lock().push(connection.id());
    }

    fn on_message_received(&self, sender: Option<Arc<Connection<u32>>>, message: Message<u32>) {
        self.received.lock().push((sender.map(|c| c.id()), message));
    }
}

/// Handler whose disconnect hook is slow enough to overlap concurrent callers
#[derive(Default)]
struct SlowDisconnectCounter {
    reports: AtomicUsize,
}

impl ServerHandler<u32> for SlowDisconnectCounter {
    fn on_client_disconnected(&self, _connection: &Arc<Connection<u32>>) {
        self.reports.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn start_server(accept: bool) -> (Server<u32, RecordingHandler>, u16) {
    init_tracing();
    let mut server = Server::new(0, RecordingHandler::new(accept));
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

/// Connect a client and wait until the server has registered it
fn connect_client(server: &Server<u32, RecordingHandler>, port: u16) -> Client<u32> {
    let expected = server.connection_count() + 1;
    let mut client = Client::new();
    client.connect("127.0.0.1", port).unwrap();
    assert!(wait_until(Duration::from_secs(5), || client.is_connected()));
    assert!(wait_until(Duration::from_secs(5), || server.connection_count() == expected));
    client
}

fn numbered(i: u32) -> Message<u32> {
    let mut msg = Message::new(1);
    msg.append(i).unwrap();
    msg
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_start_and_stop() {
    let (mut server, _port) = start_server(true);
    assert!(server.is_running());
    assert!(server.local_addr().is_some());

    server.stop();
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());

    // Idempotent
    server.stop();
}

#[test]
fn test_start_fails_when_port_taken() {
    init_tracing();
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let config = Config::builder().bind_addr(Ipv4Addr::LOCALHOST).build();
    let mut server: Server<u32, RecordingHandler> =
        Server::with_config(port, RecordingHandler::new(true), config);

    assert!(matches!(server.start(), Err(LinkError::Setup(_))));
    assert!(!server.is_running());
}

#[test]
fn test_stop_closes_connections() {
    let (mut server, port) = start_server(true);
    let client = connect_client(&server, port);

    server.stop();

    assert!(server.connections().iter().all(|c| !c.is_connected()));
    assert!(wait_until(Duration::from_secs(5), || !client.is_connected()));
}

// =============================================================================
// Connect Gate Tests
// =============================================================================

#[test]
fn test_accepted_connection_is_registered() {
    let (server, port) = start_server(true);
    let _client = connect_client(&server, port);

    let connections = server.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].role(), Role::Server);
    assert_eq!(connections[0].id(), Config::default().first_connection_id);
    assert!(connections[0].is_connected());
    assert_eq!(server.handler().connected.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ids_increase_per_connection() {
    let (server, port) = start_server(true);
    let _a = connect_client(&server, port);
    let _b = connect_client(&server, port);
    let _c = connect_client(&server, port);

    let ids: Vec<u32> = server.connections().iter().map(|c| c.id()).collect();
    let first = Config::default().first_connection_id;
    assert_eq!(ids, vec![first, first + 1, first + 2]);
}

#[test]
fn test_registered_connections_always_carry_assigned_id() {
    let (server, port) = start_server(true);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let observer = scope.spawn(|| {
            let mut zero_ids = 0;
            while !done.load(Ordering::SeqCst) {
                zero_ids += server.connections().iter().filter(|c| c.id() == 0).count();
            }
            zero_ids
        });

        let clients: Vec<Client<u32>> = (0..20).map(|_| connect_client(&server, port)).collect();
        done.store(true, Ordering::SeqCst);

        assert_eq!(observer.join().unwrap(), 0);
        assert_eq!(server.connection_count(), clients.len());
    });
}

#[test]
fn test_rejected_client_is_closed_and_not_registered() {
    let (server, port) = start_server(false);

    let mut client: Client<u32> = Client::new();
    client.connect("127.0.0.1", port).unwrap();

    assert!(wait_until(Duration::from_secs(5), || server.handler().connected.load(Ordering::SeqCst) == 1));
    assert_eq!(server.connection_count(), 0);

    // The client notices once its read pipeline hits EOF
    let connection = client.connection().unwrap().clone();
    assert!(wait_until(Duration::from_secs(5), || !connection.is_connected()));
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_respects_max_messages() {
    let (server, port) = start_server(true);
    let client = connect_client(&server, port);

    for i in 0..5 {
        client.send(numbered(i)).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || server.queue().len() == 5));

    assert_eq!(server.update(Some(2), true), 2);
    assert_eq!(server.queue().len(), 3);
    assert_eq!(server.handler().received.lock().len(), 2);

    assert_eq!(server.update(None, false), 3);
    assert!(server.queue().is_empty());

    let mut received = server.handler().received.lock();
    let order: Vec<u32> = received
        .iter_mut()
        .map(|(_, msg)| msg.extract::<u32>().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_update_on_empty_queue_without_wait() {
    let (server, _port) = start_server(true);
    assert_eq!(server.update(None, false), 0);
    assert_eq!(server.update(Some(10), false), 0);
}

#[test]
fn test_update_reports_sender() {
    let (server, port) = start_server(true);
    let client = connect_client(&server, port);
    let id = server.connections()[0].id();

    client.send(numbered(7)).unwrap();
    assert_eq!(server.update(Some(1), true), 1);

    let received = server.handler().received.lock();
    assert_eq!(received[0].0, Some(id));
}

#[test]
fn test_queued_message_does_not_keep_dead_connection_alive() {
    let (server, port) = start_server(true);
    let mut client = connect_client(&server, port);

    client.send(numbered(1)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || server.queue().len() == 1));

    let weak = Arc::downgrade(&server.connections()[0]);
    client.disconnect();
    assert!(wait_until(Duration::from_secs(5), || !server.connections()[0].is_connected()));

    server.message_all(&numbered(2));
    assert_eq!(server.connection_count(), 0);
    assert!(wait_until(Duration::from_secs(5), || weak.strong_count() == 0));

    assert_eq!(server.update(None, false), 1);
    assert_eq!(server.handler().received.lock()[0].0, None);
}

// =============================================================================
// message_client Tests
// =============================================================================

#[test]
fn test_message_client_delivers_to_target() {
    let (server, port) = start_server(true);
    let client = connect_client(&server, port);
    let target = server.connections()[0].clone();

    server.message_client(&numbered(42), Some(&target));

    assert!(client.queue().wait_timeout(Duration::from_secs(5)));
    let mut owned = client.queue().pop().unwrap();
    assert!(owned.remote.is_none());
    assert_eq!(owned.msg.extract::<u32>().unwrap(), 42);
}

#[test]
fn test_message_client_to_dead_target_fires_hook_once() {
    let (server, port) = start_server(true);
    let mut client = connect_client(&server, port);
    let target = server.connections()[0].clone();

    client.disconnect();
    assert!(wait_until(Duration::from_secs(5), || !target.is_connected()));

    server.message_client(&numbered(1), Some(&target));
    assert_eq!(server.connection_count(), 0);
    assert_eq!(*server.handler().disconnected.lock(), vec![target.id()]);

    // Already removed: no second report
    server.message_client(&numbered(2), Some(&target));
    assert_eq!(server.handler().disconnected.lock().len(), 1);
}

#[test]
fn test_message_client_without_target_is_ignored() {
    let (server, port) = start_server(true);
    let _client = connect_client(&server, port);

    server.message_client(&numbered(1), None);

    assert_eq!(server.connection_count(), 1);
    assert!(server.handler().disconnected.lock().is_empty());
}

// =============================================================================
// message_all Tests
// =============================================================================

#[test]
fn test_message_all_reaches_every_client() {
    let (server, port) = start_server(true);
    let clients: Vec<Client<u32>> = (0..3).map(|_| connect_client(&server, port)).collect();

    server.message_all(&numbered(9));

    for client in &clients {
        assert!(client.queue().wait_timeout(Duration::from_secs(5)));
        let mut owned = client.queue().pop().unwrap();
        assert_eq!(owned.msg.extract::<u32>().unwrap(), 9);
    }
    assert!(server.handler().disconnected.lock().is_empty());
}

#[test]
fn test_message_all_removes_exactly_the_dead_connections() {
    let (server, port) = start_server(true);
    let mut a = connect_client(&server, port);
    let b = connect_client(&server, port);
    let mut c = connect_client(&server, port);

    let ids: Vec<u32> = server.connections().iter().map(|conn| conn.id()).collect();
    a.disconnect();
    c.disconnect();
    assert!(wait_until(Duration::from_secs(5), || {
        server.connections().iter().filter(|conn| conn.is_connected()).count() == 1
    }));

    server.message_all(&numbered(5));

    let mut disconnected = server.handler().disconnected.lock().clone();
    disconnected.sort();
    assert_eq!(disconnected, vec![ids[0], ids[2]]);

    let remaining: Vec<u32> = server.connections().iter().map(|conn| conn.id()).collect();
    assert_eq!(remaining, vec![ids[1]]);

    assert!(b.queue().wait_timeout(Duration::from_secs(5)));

    // A second pass finds nothing more to remove
    server.message_all(&numbered(6));
    assert_eq!(server.handler().disconnected.lock().len(), 2);
}

// =============================================================================
// Concurrent Cleanup Tests
// =============================================================================

/// Server with one client already dead, plus the handle of its connection
fn server_with_dead_client() -> (Server<u32, SlowDisconnectCounter>, Arc<Connection<u32>>) {
    init_tracing();
    let mut server = Server::new(0, SlowDisconnectCounter::default());
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();

    let mut client: Client<u32> = Client::new();
    client.connect("127.0.0.1", port).unwrap();
    assert!(wait_until(Duration::from_secs(5), || server.connection_count() == 1));

    let target = server.connections()[0].clone();
    client.disconnect();
    assert!(wait_until(Duration::from_secs(5), || !target.is_connected()));
    (server, target)
}

#[test]
fn test_concurrent_message_all_reports_dead_connection_once() {
    let (server, _target) = server_with_dead_client();

    thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| server.message_all(&numbered(1)));
        }
    });

    assert_eq!(server.handler().reports.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_message_client_racing_message_all_reports_once() {
    let (server, target) = server_with_dead_client();

    thread::scope(|scope| {
        scope.spawn(|| server.message_all(&numbered(1)));
        scope.spawn(|| server.message_client(&numbered(2), Some(&target)));
    });

    assert_eq!(server.handler().reports.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 0);
}
