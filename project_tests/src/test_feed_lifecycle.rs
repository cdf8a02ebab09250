use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;

use lib_common::core::backoff::BackoffPolicy;
use lib_common::core::connection_manager::ConnectionManager;
use lib_common::core::error::FeedError;
use lib_common::core::feed_config::FeedConfig;
use lib_common::core::session::{ConnectionState, TerminalReason};
use lib_common::core::transport::{OutboundFrame, RawFrame, TransportEvent};
use lib_common::decoders::JsonParsedDecoder;
use project_tests::{
    ack, pump_notification, transaction_notification, wait_for, FailingConnector, Peer,
    RecordingSink, ScriptedConnector,
};

const STOPPED: ConnectionState = ConnectionState::Failed(TerminalReason::Stopped);

/// Paused time lands on timer deadlines, give or take timer resolution.
fn assert_between(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "elapsed {:?}, expected {:?}",
        elapsed,
        expected
    );
}

async fn expect_subscribe(peer: &mut Peer) -> Value {
    match peer.outbound.recv().await {
        Some(OutboundFrame::Text(text)) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected the subscribe request, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_ack_heartbeat_notification_and_reconnect() {
    let (connector, mut peers) = ScriptedConnector::new();
    let sink = RecordingSink::default();
    let manager = ConnectionManager::new(connector, FeedConfig::default(), JsonParsedDecoder, sink.clone());
    let mut states = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());

    // First connection: subscribe request goes out as soon as the link is up.
    let mut peer = peers.recv().await.unwrap();
    let request = expect_subscribe(&mut peer).await;
    assert_eq!(request["method"], "transactionSubscribe");
    assert_eq!(request["id"], 420);
    assert_eq!(request["params"][0], "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");
    assert_eq!(request["params"][1]["encoding"], "jsonParsed");

    // Garbage and a foreign ack leave the session waiting.
    peer.events
        .send(TransportEvent::Frame(RawFrame::Text("{not json".to_string())))
        .unwrap();
    peer.send_json(ack(999, 1));
    peer.send_json(ack(420, 7));

    let change = wait_for(&mut states, ConnectionState::Active).await;
    assert_eq!(change.from, ConnectionState::AwaitingAck);
    assert_eq!(change.attempt, 0);
    let active_at = Instant::now();

    // One ping per heartbeat period.
    assert_eq!(peer.outbound.recv().await, Some(OutboundFrame::Ping));
    assert_between(active_at.elapsed(), Duration::from_secs(30));

    // One relevant notification, one the filter drops.
    peer.send_json(pump_notification("5xRelevant"));
    peer.send_json(transaction_notification("5xIrrelevant", "ComputeBudget111111111111111111111111111111"));
    peer.send_json(json!({"jsonrpc": "2.0", "method": "slotNotification", "params": {}}));

    // Server goes away.
    peer.events
        .send(TransportEvent::Closed(Some("1000 bye".to_string())))
        .unwrap();

    let change = wait_for(&mut states, ConnectionState::Closing).await;
    assert_eq!(change.from, ConnectionState::Active);
    wait_for(&mut states, ConnectionState::Backoff).await;
    let backoff_at = Instant::now();

    let change = wait_for(&mut states, ConnectionState::Connecting).await;
    assert_between(backoff_at.elapsed(), Duration::from_millis(1000));
    assert_eq!(change.attempt, 1);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "5xRelevant");
    assert_eq!(delivered[0].1.instructions.len(), 1);

    // The old link got exactly one close.
    assert_eq!(peer.drain().await, vec![OutboundFrame::Close]);

    // Second connection, shut down before the ack arrives.
    let mut peer = peers.recv().await.unwrap();
    expect_subscribe(&mut peer).await;

    shutdown.shutdown();
    shutdown.shutdown();

    let change = wait_for(&mut states, STOPPED).await;
    assert_eq!(change.from, ConnectionState::Closing);
    assert!(run.await.unwrap().is_ok());
    assert_eq!(peer.drain().await, vec![OutboundFrame::Close]);
}

/// A notification the decoder rejects: `instructions` is not a list.
fn undecodable_notification(signature: &str) -> Value {
    let mut notification = pump_notification(signature);
    notification["params"]["result"]["transaction"]["transaction"]["message"]["instructions"] = json!("x");
    notification
}

#[tokio::test(start_paused = true)]
async fn test_early_notifications_and_decode_failures_keep_session() {
    let (connector, mut peers) = ScriptedConnector::new();
    let sink = RecordingSink::default();
    let manager = ConnectionManager::new(connector, FeedConfig::default(), JsonParsedDecoder, sink.clone());
    let mut states = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());

    let mut peer = peers.recv().await.unwrap();
    expect_subscribe(&mut peer).await;

    // Notifications can beat the ack; an error reply to our id is not an ack.
    peer.send_json(pump_notification("5xEarly"));
    peer.send_json(undecodable_notification("5xBrokenEarly"));
    peer.send_json(json!({"jsonrpc": "2.0", "id": 420, "error": {"code": -32602, "message": "busy"}}));
    peer.send_json(json!({"jsonrpc": "2.0", "id": 420, "result": 7.0}));

    let change = wait_for(&mut states, ConnectionState::Active).await;
    assert_eq!(change.from, ConnectionState::AwaitingAck);
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "5xEarly");

    peer.send_json(undecodable_notification("5xBrokenLate"));
    peer.send_json(pump_notification("5xLate"));
    peer.events.send(TransportEvent::Closed(None)).unwrap();

    // The only teardown is the one the server asked for.
    let mut closings = Vec::new();
    loop {
        let change = states.recv().await.unwrap();
        if change.to == ConnectionState::Closing {
            closings.push(change.from);
        }
        if change.to == ConnectionState::Backoff {
            break;
        }
    }
    assert_eq!(closings, vec![ConnectionState::Active]);

    let signatures: Vec<String> = sink.delivered().into_iter().map(|(sig, _)| sig).collect();
    assert_eq!(signatures, vec!["5xEarly".to_string(), "5xLate".to_string()]);

    shutdown.shutdown();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_skips_while_link_not_ready() {
    let (connector, mut peers) = ScriptedConnector::new();
    let manager = ConnectionManager::new(
        connector,
        FeedConfig::default(),
        JsonParsedDecoder,
        RecordingSink::default(),
    );
    let mut states = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());

    let mut peer = peers.recv().await.unwrap();
    expect_subscribe(&mut peer).await;
    peer.send_json(ack(420, 11));
    wait_for(&mut states, ConnectionState::Active).await;

    peer.ready.store(false, Ordering::Release);
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(peer.outbound.try_recv(), Err(TryRecvError::Empty));

    peer.ready.store(true, Ordering::Release);
    assert_eq!(peer.outbound.recv().await, Some(OutboundFrame::Ping));

    shutdown.shutdown();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_exhausted() {
    let manager = ConnectionManager::new(
        FailingConnector,
        FeedConfig::default(),
        JsonParsedDecoder,
        RecordingSink::default(),
    );
    let mut states = manager.subscribe_state();
    let started = Instant::now();

    let result = manager.run().await;

    // 1 + 2 + 4 + 8 + 16 seconds of backoff, then give up.
    assert_between(started.elapsed(), Duration::from_secs(31));
    match result {
        Err(FeedError::RetryExhausted { attempts, max }) => {
            assert_eq!(attempts, 5);
            assert_eq!(max, 5);
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }

    let mut connecting = 0;
    let mut last = None;
    while let Ok(change) = states.try_recv() {
        if change.to == ConnectionState::Connecting {
            connecting += 1;
        }
        last = Some(change);
    }
    assert_eq!(connecting, 6);
    let last = last.unwrap();
    assert_eq!(last.from, ConnectionState::Backoff);
    assert_eq!(last.to, ConnectionState::Failed(TerminalReason::RetryExhausted));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_backoff_sleep() {
    let config = FeedConfig {
        backoff: BackoffPolicy::new(Duration::from_secs(60), 3),
        ..FeedConfig::default()
    };
    let manager = ConnectionManager::new(FailingConnector, config, JsonParsedDecoder, RecordingSink::default());
    let mut states = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());

    wait_for(&mut states, ConnectionState::Backoff).await;
    let stopped_at = Instant::now();
    shutdown.shutdown();

    let change = wait_for(&mut states, STOPPED).await;
    assert_eq!(change.from, ConnectionState::Backoff);
    assert!(run.await.unwrap().is_ok());
    assert!(stopped_at.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_successful_ack_resets_attempts() {
    let config = FeedConfig {
        backoff: BackoffPolicy::new(Duration::from_millis(100), 2),
        ..FeedConfig::default()
    };
    let (connector, mut peers) = ScriptedConnector::new();
    let manager = ConnectionManager::new(connector, config, JsonParsedDecoder, RecordingSink::default());
    let mut states = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());
    wait_for(&mut states, ConnectionState::Connecting).await;

    // Two drops without an ack use up the budget down to its last retry...
    for expected_attempt in 1..=2 {
        let peer = peers.recv().await.unwrap();
        peer.events.send(TransportEvent::Error("reset by peer".to_string())).unwrap();
        let change = wait_for(&mut states, ConnectionState::Connecting).await;
        assert_eq!(change.attempt, expected_attempt);
    }

    // ...then a healthy session earns a fresh one.
    let mut peer = peers.recv().await.unwrap();
    expect_subscribe(&mut peer).await;
    peer.send_json(ack(420, 3));
    let change = wait_for(&mut states, ConnectionState::Active).await;
    assert_eq!(change.attempt, 0);

    peer.events.send(TransportEvent::Closed(None)).unwrap();
    let change = wait_for(&mut states, ConnectionState::Connecting).await;
    assert_eq!(change.attempt, 1);

    shutdown.shutdown();
    assert!(run.await.unwrap().is_ok());
}
