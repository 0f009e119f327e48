//! Reconnecting Channel Tests
//!
//! Drives the channel against the scripted mock transport on a paused Tokio clock, so
//! backoff timing is exact and every test runs instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use birtu_core::{
    DispatchOutcome, EventRouter, Identity, MemoryNotificationSink, ShipmentId, ShipmentStatus,
    UserProfile, UserRole,
};
use birtu_realtime::testing::{ConnectOutcome, MockTransport};
use birtu_realtime::{
    ChannelConfig, ChannelError, ConnectionState, ReconnectConfig, ReconnectingChannel,
    CLOSE_ABNORMAL, CLOSE_EXHAUSTED, CLOSE_NORMAL,
};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Open,
    Message(String),
    Close(u16),
    Error(String),
}

type SeenLog = Arc<Mutex<Vec<Seen>>>;

fn create_test_identity(id: &str) -> Identity {
    Identity::new(UserProfile::new(id, UserRole::Customer), format!("token-{}", id))
}

fn create_test_channel(config: ChannelConfig, transport: &MockTransport) -> (ReconnectingChannel, SeenLog) {
    let channel = ReconnectingChannel::new(config, Arc::new(transport.clone())).unwrap();
    let seen: SeenLog = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    channel.on_open(move || log.lock().unwrap().push(Seen::Open));
    let log = Arc::clone(&seen);
    channel.on_message(move |text| log.lock().unwrap().push(Seen::Message(text.to_string())));
    let log = Arc::clone(&seen);
    channel.on_close(move |code, _reason| log.lock().unwrap().push(Seen::Close(code)));
    let log = Arc::clone(&seen);
    channel.on_error(move |err| log.lock().unwrap().push(Seen::Error(err.to_string())));

    (channel, seen)
}

fn closes(seen: &SeenLog) -> Vec<u16> {
    seen.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            Seen::Close(code) => Some(*code),
            _ => None,
        })
        .collect()
}

fn messages(seen: &SeenLog) -> Vec<String> {
    seen.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            Seen::Message(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Let spawned tasks run without reaching any backoff timer
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn assert_close_to(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(5),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

// ----------------------------------------------------------------------------
// Backoff
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_until_exhausted() {
    let transport = MockTransport::refusing();
    let (channel, seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;

    // One initial attempt plus ten retries
    assert_eq!(transport.attempt_count(), 11);
    let expected = [1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000];
    let gaps = transport.attempt_gaps();
    assert_eq!(gaps.len(), expected.len());
    for (gap, expected_ms) in gaps.into_iter().zip(expected) {
        assert_close_to(gap, expected_ms);
    }

    assert!(channel.is_exhausted());
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(channel.pending_reconnect(), None);

    let codes = closes(&seen);
    assert_eq!(codes.len(), 11);
    assert!(codes[..10].iter().all(|code| *code == CLOSE_ABNORMAL));
    assert_eq!(codes[10], CLOSE_EXHAUSTED);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_reset_after_open() {
    let transport = MockTransport::new();
    transport.script([ConnectOutcome::Refuse, ConnectOutcome::Refuse]);
    let (channel, seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.attempt_count(), 3);
    assert!(channel.is_open());
    assert_eq!(channel.attempt(), 0);
    assert!(seen.lock().unwrap().contains(&Seen::Open));

    transport.last_remote().unwrap().drop_link();
    settle().await;

    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(channel.attempt(), 1);
    assert_eq!(channel.pending_reconnect(), Some(Duration::from_millis(1_000)));
}

#[tokio::test(start_paused = true)]
async fn test_server_close_frame_triggers_reconnect() {
    let transport = MockTransport::new();
    let (channel, seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    settle().await;
    transport.last_remote().unwrap().close(1001, "going away");
    settle().await;

    assert_eq!(closes(&seen), vec![1001]);
    assert_eq!(channel.pending_reconnect(), Some(Duration::from_millis(1_000)));

    tokio::time::sleep(Duration::from_millis(1_010)).await;
    assert_eq!(transport.attempt_count(), 2);
    assert!(channel.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_counts_as_failure() {
    let transport = MockTransport::with_fallback(ConnectOutcome::Hang);
    let (channel, seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    tokio::time::sleep(Duration::from_millis(10_001)).await;

    let errors: Vec<Seen> = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, Seen::Error(_)))
        .cloned()
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], Seen::Error(text) if text.contains("timed out")));
    assert_eq!(channel.pending_reconnect(), Some(Duration::from_millis(1_000)));
}

// ----------------------------------------------------------------------------
// Explicit Control
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_explicit_close_never_reconnects() {
    let transport = MockTransport::new();
    let (channel, seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    settle().await;
    assert!(channel.is_open());

    channel.close();
    settle().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(transport.last_remote().unwrap().is_closed());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(closes(&seen), vec![CLOSE_NORMAL]);
    assert_eq!(channel.attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let transport = MockTransport::refusing();
    let (channel, _seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    settle().await;
    assert!(channel.pending_reconnect().is_some());

    channel.close();
    assert_eq!(channel.pending_reconnect(), None);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_preempts_backoff() {
    let transport = MockTransport::refusing();
    let (channel, _seen) = create_test_channel(ChannelConfig::default(), &transport);
    let identity = create_test_identity("u1");

    channel.connect(&identity).unwrap();
    settle().await;
    assert_eq!(channel.pending_reconnect(), Some(Duration::from_millis(1_000)));

    transport.set_fallback(ConnectOutcome::Accept);
    channel.connect(&identity).unwrap();
    assert_eq!(channel.pending_reconnect(), None);
    settle().await;

    assert_eq!(transport.attempt_count(), 2);
    assert!(transport.attempt_gaps()[0] < Duration::from_millis(10));
    assert!(channel.is_open());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let transport = MockTransport::new();
    let (channel, _seen) = create_test_channel(ChannelConfig::default(), &transport);
    let identity = create_test_identity("u1");

    channel.connect(&identity).unwrap();
    channel.connect(&identity).unwrap();
    settle().await;
    channel.connect(&identity).unwrap();
    settle().await;

    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(channel.stats().opens, 1);
}

#[tokio::test(start_paused = true)]
async fn test_switching_identity_replaces_connection() {
    let transport = MockTransport::new();
    let (channel, seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    settle().await;
    channel.connect(&create_test_identity("u2")).unwrap();
    settle().await;

    let endpoints: Vec<String> = transport
        .attempts()
        .iter()
        .map(|attempt| attempt.endpoint.to_string())
        .collect();
    assert_eq!(
        endpoints,
        vec!["ws://localhost:8000/api/ws/u1", "ws://localhost:8000/api/ws/u2"]
    );

    let remotes = transport.remotes();
    assert!(remotes[0].is_closed());
    assert!(!remotes[1].is_closed());
    assert!(channel.is_open());
    assert!(closes(&seen).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_channel_resumes_on_connect() {
    let config = ChannelConfig {
        reconnect: ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        },
        ..ChannelConfig::default()
    };
    let transport = MockTransport::refusing();
    let (channel, seen) = create_test_channel(config, &transport);
    let identity = create_test_identity("u1");

    channel.connect(&identity).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempt_count(), 3);
    assert!(channel.is_exhausted());
    assert_eq!(closes(&seen).last(), Some(&CLOSE_EXHAUSTED));

    transport.set_fallback(ConnectOutcome::Accept);
    channel.connect(&identity).unwrap();
    settle().await;
    assert!(channel.is_open());
    assert!(!channel.is_exhausted());
    assert_eq!(channel.attempt(), 0);
}

// ----------------------------------------------------------------------------
// Messaging
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_send_only_while_open() {
    let transport = MockTransport::new();
    let (channel, _seen) = create_test_channel(ChannelConfig::default(), &transport);

    assert!(!channel.send(&serde_json::json!({"type": "ping"})));
    assert_eq!(channel.stats().messages_dropped, 1);

    channel.connect(&create_test_identity("u1")).unwrap();
    assert!(!channel.send_text("too early"));
    settle().await;

    assert!(channel.send(&serde_json::json!({"type": "ping"})));
    settle().await;
    assert_eq!(
        transport.last_remote().unwrap().sent(),
        vec![r#"{"type":"ping"}"#.to_string()]
    );
    assert_eq!(channel.stats().messages_dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_order_is_preserved() {
    let transport = MockTransport::new();
    let (channel, seen) = create_test_channel(ChannelConfig::default(), &transport);

    channel.connect(&create_test_identity("u1")).unwrap();
    settle().await;
    let remote = transport.last_remote().unwrap();
    for n in 1..=5 {
        remote.push_text(n.to_string());
    }
    settle().await;

    assert_eq!(messages(&seen), vec!["1", "2", "3", "4", "5"]);
    assert_eq!(channel.stats().messages_received, 5);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_keeps_channel_open() {
    let transport = MockTransport::new();
    let (channel, _seen) = create_test_channel(ChannelConfig::default(), &transport);

    let router = EventRouter::new(Arc::new(MemoryNotificationSink::new())).into_shared();
    router
        .lock()
        .unwrap()
        .book_mut()
        .create_draft("s1")
        .publish()
        .unwrap();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Arc::clone(&router);
    let recorded = Arc::clone(&outcomes);
    channel.on_message(move |text| {
        let outcome = dispatcher.lock().unwrap().dispatch(text);
        recorded.lock().unwrap().push(outcome);
    });

    channel.connect(&create_test_identity("u1")).unwrap();
    settle().await;
    let remote = transport.last_remote().unwrap();
    remote.push_text("{\"type\": \"new_bid\", ");
    remote.push_text(r#"{"type":"new_bid","data":{"shipment_id":"s1","bid_id":"b1","amount":500}}"#);
    settle().await;

    assert!(channel.is_open());
    let outcomes = outcomes.lock().unwrap();
    assert!(matches!(outcomes[0], DispatchOutcome::Malformed { .. }));
    assert!(matches!(outcomes[1], DispatchOutcome::Applied { .. }));

    let router = router.lock().unwrap();
    assert_eq!(router.stats().decode_errors, 1);
    assert_eq!(
        router.book().shipment(&ShipmentId::new("s1")).unwrap().status(),
        ShipmentStatus::Bidding
    );
}

#[test]
fn test_requires_runtime() {
    let result = ReconnectingChannel::new(ChannelConfig::default(), Arc::new(MockTransport::new()));
    assert!(matches!(result, Err(ChannelError::NoRuntime(_))));
}
