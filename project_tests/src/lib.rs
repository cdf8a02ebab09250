//! Shared harness for the integration tests: an in-memory transport the test
//! drives by hand, a sink that records deliveries, and helpers for following
//! the state machine.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use lib_common::core::error::FeedError;
use lib_common::core::pipeline::{DecodedEvent, EventSink, PUMP_AMM_PROGRAM_ID};
use lib_common::core::session::{ConnectionState, StateChange};
use lib_common::core::transport::{
    Connector, OutboundFrame, OutboundHandle, RawFrame, TransportEvent, TransportLink,
};

/// The far end of one scripted connection.
pub struct Peer {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    pub ready: Arc<AtomicBool>,
}

impl Peer {
    pub fn send_json(&self, value: Value) {
        let _ = self
            .events
            .send(TransportEvent::Frame(RawFrame::Text(value.to_string())));
    }

    /// Everything the manager wrote until it dropped the link.
    pub async fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.outbound.recv().await {
            frames.push(frame);
        }
        frames
    }
}

/// Every `connect()` succeeds and hands the far end to the test.
pub struct ScriptedConnector {
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: tx }, rx)
    }
}

impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<TransportLink, FeedError> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(true));

        self.peers
            .send(Peer {
                events: ev_tx,
                outbound: out_rx,
                ready: Arc::clone(&ready),
            })
            .map_err(|_| FeedError::Transport("test harness dropped".to_string()))?;

        Ok(TransportLink::new(OutboundHandle::new(out_tx, ready), ev_rx))
    }
}

/// Every `connect()` fails.
pub struct FailingConnector;

impl Connector for FailingConnector {
    async fn connect(&self) -> Result<TransportLink, FeedError> {
        Err(FeedError::Transport("connection refused".to_string()))
    }
}

/// Records `(signature, event)` for every delivery.
#[derive(Clone, Default)]
pub struct RecordingSink {
    delivered: Arc<Mutex<Vec<(String, DecodedEvent)>>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<(String, DecodedEvent)> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn accept(&mut self, event: DecodedEvent, signature: &str, _timestamp: DateTime<Utc>) {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((signature.to_string(), event));
        }
    }
}

/// Reads transitions until one lands in `target`.
pub async fn wait_for(
    states: &mut broadcast::Receiver<StateChange>,
    target: ConnectionState,
) -> StateChange {
    loop {
        match states.recv().await {
            Ok(change) if change.to == target => return change,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                panic!("state channel closed before reaching {}", target)
            }
        }
    }
}

pub fn ack(id: u64, handle: u64) -> Value {
    json!({"jsonrpc": "2.0", "result": handle, "id": id})
}

/// A `transactionNotification` whose only program instruction is `program_id`.
pub fn transaction_notification(signature: &str, program_id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "transactionNotification",
        "params": {
            "subscription": 7,
            "result": {
                "signature": signature,
                "slot": 320_000_000u64,
                "transaction": {
                    "transaction": {
                        "signatures": [signature],
                        "message": {
                            "accountKeys": [{"pubkey": "Payer111", "signer": true}],
                            "instructions": [
                                {"programId": program_id, "accounts": ["Pool111", "Payer111"], "data": "3Bxs4h24hBtQy9rw"}
                            ]
                        }
                    },
                    "meta": {"err": null, "innerInstructions": [], "logMessages": []}
                }
            }
        }
    })
}

pub fn pump_notification(signature: &str) -> Value {
    transaction_notification(signature, PUMP_AMM_PROGRAM_ID)
}
