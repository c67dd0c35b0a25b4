use pollnet::{Bridge, Completion, CompletionKind, ConnectionHandle, ConnectionState};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn next(bridge: &Bridge) -> Completion {
    bridge.poll(WAIT).expect("expected a completion")
}

/// Collects the next `n` completions.
fn take(bridge: &Bridge, n: usize) -> Vec<Completion> {
    (0..n).map(|_| next(bridge)).collect()
}

fn find(events: &[Completion], id: i32) -> &Completion {
    events
        .iter()
        .find(|event| event.kind == CompletionKind::Completed && event.correlation_id == id)
        .expect("missing completion")
}

/// Connects a bridge client to a bridge listener.
///
/// Returns `(server side, client side)`.
fn pair(bridge: &Bridge) -> (ConnectionHandle, ConnectionHandle) {
    let listener = bridge.listen("127.0.0.1", 0).expect("Failed to listen");
    let addr = bridge.listener_addr(listener).expect("listener");

    let client = bridge.connect(addr, 100);
    let events = take(bridge, 2);

    let accepted = events
        .iter()
        .find(|event| event.kind == CompletionKind::Accepted)
        .and_then(|event| event.subject)
        .expect("missing accept");

    let connected = find(&events, 100);
    assert_eq!(connected.subject, Some(client));
    assert!(connected.payload.is_empty());

    (accepted, client)
}

/// Spawns a blocking peer on a std listener and connects a bridge
/// client to it.
fn peer<F>(bridge: &Bridge, serve: F) -> (ConnectionHandle, thread::JoinHandle<()>)
where
    F: FnOnce(std::net::TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("Failed to accept connection");
        serve(stream);
    });

    let client = bridge.connect(addr, 100);
    let connected = next(bridge);
    assert_eq!(connected.correlation_id, 100);
    assert_eq!(connected.subject, Some(client));
    assert_eq!(bridge.connection_state(client), Some(ConnectionState::Open));

    (client, handle)
}

#[test]
fn test_ping_exchange() {
    init_tracing();
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, client) = pair(&bridge);

    bridge.write(client, &b"ping"[..], 1);
    bridge.read(server, 4, 2);

    let events = take(&bridge, 2);

    let written = find(&events, 1);
    assert_eq!(written.subject, Some(client));
    assert!(written.payload.is_empty());

    let read = find(&events, 2);
    assert_eq!(read.subject, Some(server));
    assert_eq!(&read.payload[..], b"ping");

    assert!(bridge.poll(Some(Duration::from_millis(50))).is_none());
}

#[test]
fn test_sequential_writes_complete_in_order() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, client) = pair(&bridge);

    for id in 0..5 {
        bridge.write(client, format!("msg-{id}"), id);

        let event = next(&bridge);
        assert_eq!(event.correlation_id, id);
        assert_eq!(event.subject, Some(client));
    }

    bridge.read(server, 25, 9);
    let event = next(&bridge);
    assert_eq!(&event.payload[..], b"msg-0msg-1msg-2msg-3msg-4");
}

#[test]
fn test_large_write_is_written_in_full() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, client) = pair(&bridge);

    let data: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    bridge.write(client, data.clone(), 1);
    bridge.read(server, data.len(), 2);

    let events = take(&bridge, 2);
    assert_eq!(find(&events, 1).subject, Some(client));
    assert_eq!(&find(&events, 2).payload[..], &data[..]);
}

#[test]
fn test_read_exact_waits_for_full_size() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let (client, handle) = peer(&bridge, |mut stream| {
        stream.write_all(b"abc").expect("Failed to write to stream");
        thread::sleep(Duration::from_millis(50));
        stream.write_all(b"defgh").expect("Failed to write to stream");
    });

    bridge.read(client, 8, 1);

    let event = next(&bridge);
    assert_eq!(event.correlation_id, 1);
    assert_eq!(event.subject, Some(client));
    assert_eq!(&event.payload[..], b"abcdefgh");

    handle.join().expect("Thread panicked");
}

#[test]
fn test_read_exact_fails_on_early_eof() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let (client, handle) = peer(&bridge, |mut stream| {
        stream.write_all(b"ab").expect("Failed to write to stream");
    });
    handle.join().expect("Thread panicked");

    bridge.read(client, 4, 1);

    let event = next(&bridge);
    assert_eq!(event.correlation_id, 1);
    assert!(event.subject.is_none());
    assert_eq!(event.payload_str(), "end of file");
    assert_eq!(bridge.connection_state(client), Some(ConnectionState::Closed));
}

#[test]
fn test_read_some_returns_available_bytes() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let (client, handle) = peer(&bridge, |mut stream| {
        stream.write_all(b"hello").expect("Failed to write to stream");

        let mut buffer = [0; 1];
        let _ = stream.read(&mut buffer);
    });

    bridge.read_some(client, 1);

    let event = next(&bridge);
    assert_eq!(event.subject, Some(client));
    assert!(!event.payload.is_empty());
    assert!(b"hello".starts_with(&event.payload));

    bridge.close(client);
    handle.join().expect("Thread panicked");
}

#[test]
fn test_read_some_eof_yields_two_events() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let (client, handle) = peer(&bridge, drop);
    handle.join().expect("Thread panicked");

    bridge.read_some(client, 1);

    let partial = next(&bridge);
    assert_eq!(partial.correlation_id, 1);
    assert!(partial.subject.is_none());
    assert!(partial.payload.is_empty());

    let failure = next(&bridge);
    assert_eq!(failure.correlation_id, 1);
    assert!(failure.subject.is_none());
    assert_eq!(failure.payload_str(), "end of file");

    assert!(bridge.is_stopped());
}

#[test]
fn test_connect_refused_has_no_subject() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        listener.local_addr().expect("Failed to get local address")
    };

    let client = bridge.connect(addr, 4);

    let event = next(&bridge);
    assert_eq!(event.correlation_id, 4);
    assert!(event.subject.is_none());
    assert!(!event.payload.is_empty());
    assert_eq!(bridge.connection_state(client), Some(ConnectionState::Failed));

    bridge.write(client, &b"late"[..], 5);
    assert_eq!(next(&bridge).payload_str(), "socket is not connected");
}

#[test]
fn test_destroy_with_pending_read_detaches_event() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, _client) = pair(&bridge);

    bridge.read(server, 4, 7);
    bridge.destroy_connection(server);

    let event = next(&bridge);
    assert_eq!(event.correlation_id, 7);
    assert!(event.subject.is_none());
    assert_eq!(event.payload_str(), "operation canceled");
    assert!(bridge.connection_state(server).is_none());

    bridge.read(server, 4, 8);
    let event = next(&bridge);
    assert_eq!(event.correlation_id, 8);
    assert_eq!(event.payload_str(), "stale or unknown handle");
}

#[test]
fn test_close_is_idempotent() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, client) = pair(&bridge);

    bridge.close(client);
    bridge.close(client);
    assert_eq!(bridge.connection_state(client), Some(ConnectionState::Closed));
    assert!(bridge.poll(Some(Duration::from_millis(20))).is_none());

    bridge.read(client, 1, 1);
    assert_eq!(next(&bridge).payload_str(), "socket is not connected");

    // The peer sees the close as end of stream.
    bridge.read_some(server, 2);
    let events = take(&bridge, 2);
    assert_eq!(events[1].payload_str(), "end of file");
}

#[test]
fn test_close_aborts_pending_operations() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, _client) = pair(&bridge);

    bridge.read(server, 16, 1);
    bridge.close(server);

    let event = next(&bridge);
    assert_eq!(event.correlation_id, 1);
    assert!(event.subject.is_none());
    assert_eq!(event.payload_str(), "operation canceled");
    assert_eq!(bridge.connection_state(server), Some(ConnectionState::Closed));
}

#[test]
fn test_duplicate_read_is_rejected() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, client) = pair(&bridge);

    bridge.read(server, 4, 1);
    bridge.read(server, 4, 2);

    let rejected = next(&bridge);
    assert_eq!(rejected.correlation_id, 2);
    assert_eq!(rejected.payload_str(), "operation already in progress");

    bridge.write(client, &b"data"[..], 3);
    let events = take(&bridge, 2);
    assert_eq!(&find(&events, 1).payload[..], b"data");
}

#[test]
fn test_zero_length_read_completes_empty() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, _client) = pair(&bridge);

    bridge.read(server, 0, 1);

    let event = next(&bridge);
    assert_eq!(event.correlation_id, 1);
    assert_eq!(event.subject, Some(server));
    assert!(event.payload.is_empty());
}

#[test]
fn test_read_issued_while_connecting() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let client = bridge.connect(addr, 1);
    bridge.read(client, 3, 2);

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        stream.write_all(b"xyz").expect("Failed to write to stream");
    });

    let events = take(&bridge, 2);
    assert_eq!(events[0].correlation_id, 1);
    assert_eq!(&find(&events, 2).payload[..], b"xyz");

    handle.join().expect("Thread panicked");
}

#[test]
fn test_zero_length_read_issued_while_connecting() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let client = bridge.connect(addr, 1);
    bridge.read(client, 0, 2);

    let handle = thread::spawn(move || listener.accept().map(|(stream, _)| stream));

    // The peer never sends anything, so only the handshake can wake the read.
    let events = take(&bridge, 2);
    assert_eq!(events[0].correlation_id, 1);

    let read = find(&events, 2);
    assert_eq!(read.subject, Some(client));
    assert!(read.payload.is_empty());
    assert_eq!(bridge.pending(), 0);

    let _stream = handle
        .join()
        .expect("Thread panicked")
        .expect("Failed to accept connection");
}

#[test]
fn test_write_to_reset_peer_fails_and_closes() {
    init_tracing();
    let bridge = Bridge::new().expect("Failed to create bridge");

    let (client, handle) = peer(&bridge, drop);
    handle.join().expect("Thread panicked");

    let chunk = vec![0u8; 64 * 1024];
    let mut failure = None;

    for id in 0..64 {
        bridge.write(client, chunk.clone(), id);
        let event = next(&bridge);
        assert_eq!(event.correlation_id, id);

        if event.subject.is_none() {
            failure = Some(event);
            break;
        }

        thread::sleep(Duration::from_millis(10));
    }

    let failure = failure.expect("writes to a closed peer never failed");
    assert!(!failure.payload.is_empty());
    assert_eq!(bridge.connection_state(client), Some(ConnectionState::Closed));

    bridge.write(client, &b"late"[..], 99);
    let late = next(&bridge);
    assert!(late.subject.is_none());
    assert_eq!(late.payload_str(), "socket is not connected");
}

#[test]
fn test_connect_host_resolves_localhost() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let port = listener.local_addr().expect("Failed to get local address").port();

    let client = bridge.connect_host("localhost", port, 1, false);

    let event = next(&bridge);
    assert_eq!(event.correlation_id, 1);
    assert_eq!(event.subject, Some(client));
}

#[test]
fn test_connect_host_unresolvable_name() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let client = bridge.connect_host("no-such-host.invalid", 80, 1, true);

    let event = next(&bridge);
    assert!(event.subject.is_none());
    assert!(event.payload_str().starts_with("could not resolve"));
    assert_eq!(bridge.connection_state(client), Some(ConnectionState::Failed));
}

fn raw_ipv4(addr: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = addr else {
        panic!("expected an IPv4 address");
    };

    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as _;
    sin.sin_port = v4.port().to_be();
    sin.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

    let bytes = unsafe {
        std::slice::from_raw_parts(
            &sin as *const _ as *const u8,
            std::mem::size_of::<libc::sockaddr_in>(),
        )
    };

    bytes.to_vec()
}

#[test]
fn test_connect_raw_address() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");
    let raw = raw_ipv4(addr);

    assert_eq!(
        pollnet::addr_to_string(&raw).expect("valid address"),
        addr.to_string()
    );

    let client = bridge.connect_raw(&raw, 1);
    let event = next(&bridge);
    assert_eq!(event.subject, Some(client));

    bridge.connect_raw(&raw[..3], 2);
    let event = next(&bridge);
    assert_eq!(event.correlation_id, 2);
    assert!(event.subject.is_none());
}

#[test]
fn test_original_destination_without_redirect() {
    let bridge = Bridge::new().expect("Failed to create bridge");
    let (server, client) = pair(&bridge);

    // Without a NAT rule there is nothing to report, or the lookup
    // echoes the address the peer dialled.
    if let Some(original) = bridge.original_destination(server) {
        assert!(original.ip().is_loopback());
    }

    bridge.destroy_connection(client);
    assert!(bridge.original_destination(client).is_none());
}

#[test]
fn test_destroy_during_pending_reads_from_another_thread() {
    init_tracing();
    let bridge = Bridge::new().expect("Failed to create bridge");

    let servers: Vec<ConnectionHandle> = (0..32)
        .map(|_| {
            let (server, _client) = pair(&bridge);
            server
        })
        .collect();

    for (id, server) in servers.iter().enumerate() {
        bridge.read(*server, 64, id as i32);
    }

    let remote = bridge.clone();
    let destroyer = thread::spawn(move || {
        for server in servers {
            remote.destroy_connection(server);
            thread::yield_now();
        }
    });

    let mut ids: Vec<i32> = (0..32)
        .map(|_| {
            let event = next(&bridge);
            assert!(event.subject.is_none());
            assert_eq!(event.payload_str(), "operation canceled");
            event.correlation_id
        })
        .collect();

    destroyer.join().expect("Thread panicked");

    ids.sort_unstable();
    assert_eq!(ids, (0..32).collect::<Vec<_>>());
    assert_eq!(bridge.pending(), 0);
}
