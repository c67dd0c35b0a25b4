use pollnet::Bridge;
use std::time::{Duration, Instant};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_sleep_fires_after_delay() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let start = Instant::now();
    bridge.sleep(Duration::from_millis(50), 1);

    let event = bridge.poll(WAIT).expect("timer should fire");

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(event.correlation_id, 1);
    assert!(event.subject.is_none());
    assert!(event.payload.is_empty());
}

#[test]
fn test_sleep_zero_duration() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let start = Instant::now();
    bridge.sleep(Duration::ZERO, 2);

    let event = bridge.poll(WAIT).expect("timer should fire");

    assert_eq!(event.correlation_id, 2);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_cancelled_timer_reports_failure() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    let start = Instant::now();
    let timer = bridge.sleep(Duration::from_secs(30), 3);
    bridge.cancel_timer(timer);

    let event = bridge.poll(WAIT).expect("cancellation should report");

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(event.correlation_id, 3);
    assert_eq!(event.payload_str(), "operation canceled");

    // Exactly one event per timer.
    bridge.cancel_timer(timer);
    assert!(bridge.poll(Some(Duration::from_millis(20))).is_none());
    assert!(bridge.is_stopped());
}

#[test]
fn test_timers_fire_in_deadline_order() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    bridge.sleep(Duration::from_millis(60), 3);
    bridge.sleep(Duration::from_millis(20), 1);
    bridge.sleep(Duration::from_millis(40), 2);

    let order: Vec<i32> = (0..3)
        .map(|_| bridge.poll(WAIT).expect("timer should fire").correlation_id)
        .collect();

    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn test_equal_deadlines_keep_arming_order() {
    let bridge = Bridge::new().expect("Failed to create bridge");

    for id in 0..5 {
        bridge.sleep(Duration::ZERO, id);
    }

    let order: Vec<i32> = (0..5)
        .map(|_| bridge.poll(WAIT).expect("timer should fire").correlation_id)
        .collect();

    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}
