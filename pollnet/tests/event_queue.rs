use pollnet::{Completion, CompletionKind, DEFAULT_QUEUE_CAPACITY, EventQueue};

fn completion(id: i32) -> Completion {
    Completion::new(CompletionKind::Completed, id, None, &b""[..])
}

#[test]
fn test_queue_drops_oldest_past_bound() {
    let bound = 64;
    let mut queue = EventQueue::new(bound);

    for id in 0..(bound as i32 + 100) {
        queue.push(completion(id));
    }

    assert_eq!(queue.len(), bound);
    assert_eq!(queue.dropped(), 100);
    assert_eq!(
        queue.front().map(|c| c.correlation_id),
        Some(100),
        "head should be the 101st pushed event"
    );
}

#[test]
fn test_queue_push_returns_evicted_event() {
    let mut queue = EventQueue::new(2);

    assert!(queue.push(completion(1)).is_none());
    assert!(queue.push(completion(2)).is_none());

    let evicted = queue.push(completion(3)).expect("oldest event should be evicted");
    assert_eq!(evicted.correlation_id, 1);
}

#[test]
fn test_queue_is_fifo() {
    let mut queue = EventQueue::new(8);

    for id in 1..=3 {
        queue.push(completion(id));
    }

    let order: Vec<i32> = std::iter::from_fn(|| queue.pop())
        .map(|c| c.correlation_id)
        .collect();

    assert_eq!(order, vec![1, 2, 3]);
    assert!(queue.is_empty());
}

#[test]
fn test_queue_pop_on_empty() {
    let mut queue = EventQueue::default();

    assert_eq!(queue.capacity(), DEFAULT_QUEUE_CAPACITY);
    assert!(queue.pop().is_none());
    assert!(queue.front().is_none());
}

#[test]
#[should_panic(expected = "queue capacity must be > 0")]
fn test_queue_rejects_zero_capacity() {
    let _ = EventQueue::new(0);
}

#[test]
fn test_failure_payload_text() {
    let event = Completion::new(
        CompletionKind::Completed,
        7,
        None,
        pollnet::Error::Canceled.to_string(),
    );

    assert!(event.is_detached());
    assert_eq!(event.payload_str(), "operation canceled");
}
