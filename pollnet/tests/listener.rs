use pollnet::{Bridge, CompletionKind, ConnectionState, Error};
use std::collections::HashSet;
use std::net::TcpStream;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_listen_rejects_invalid_address() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let result = bridge.listen("not-an-address", 0);

    assert!(matches!(result, Err(Error::InvalidAddress(_))));
    assert!(bridge.is_stopped());
}

#[test]
fn test_listen_reports_bound_port() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let listener = bridge.listen("127.0.0.1", 0).expect("Failed to listen");
    let addr = bridge.listener_addr(listener).expect("listener should be live");

    assert_ne!(addr.port(), 0);
    assert!(addr.ip().is_loopback());
    assert!(!bridge.is_stopped());
}

#[test]
fn test_listen_on_ipv6_loopback() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    // Hosts without IPv6 cannot bind ::1; nothing to check there.
    let Ok(listener) = bridge.listen("::1", 0) else {
        return;
    };

    let port = bridge.listener_addr(listener).expect("listener").port();
    let _client = TcpStream::connect(("::1", port)).expect("Failed to connect");

    let event = bridge.poll(WAIT).expect("accept should report");
    assert_eq!(event.kind, CompletionKind::Accepted);
    assert_eq!(event.correlation_id, port as i32);
}

#[test]
fn test_accepts_many_sequential_connections() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let listener = bridge.listen("127.0.0.1", 0).expect("Failed to listen");
    let port = bridge.listener_addr(listener).expect("listener").port();

    let mut subjects = HashSet::new();

    for _ in 0..1000 {
        let client = TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect");

        let event = bridge.poll(WAIT).expect("accept should report");
        assert_eq!(event.kind, CompletionKind::Accepted);
        assert_eq!(event.correlation_id, port as i32);

        let accepted = event.subject.expect("accepted connection");
        assert_eq!(bridge.connection_state(accepted), Some(ConnectionState::Open));
        assert!(subjects.insert(accepted.into_raw()));

        bridge.destroy_connection(accepted);
        drop(client);
    }

    assert_eq!(subjects.len(), 1000);
}

#[test]
fn test_destroyed_listener_emits_nothing() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let listener = bridge.listen("127.0.0.1", 0).expect("Failed to listen");
    let port = bridge.listener_addr(listener).expect("listener").port();

    bridge.destroy_listener(listener);

    assert!(bridge.listener_addr(listener).is_none());
    assert!(bridge.is_stopped());
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
    assert!(bridge.poll(Some(Duration::from_millis(50))).is_none());

    // Destroying twice is harmless.
    bridge.destroy_listener(listener);
}
