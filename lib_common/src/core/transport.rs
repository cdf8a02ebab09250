//! # Transport Seam
//!
//! The connection manager never touches a socket directly. A [`Connector`]
//! opens a physical connection and hands back a [`TransportLink`]: a queue of
//! inbound [`TransportEvent`]s for the read path and a cloneable
//! [`OutboundHandle`] for anything that needs to write (the subscription
//! request, heartbeat pings, the final close).
//!
//! Concrete transports live under `crate::ingestors`; tests script their own.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::error::FeedError;

/// Opaque frame as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl RawFrame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RawFrame::Text(text) => text.as_bytes(),
            RawFrame::Binary(bytes) => bytes,
        }
    }
}

/// Events delivered by the transport to the read path, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(RawFrame),
    /// Socket-level failure. The link is unusable afterwards.
    Error(String),
    /// The peer (or the local side) closed the connection.
    Closed(Option<String>),
}

/// Frames written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close,
}

/// Write side of a link. Cheap to clone; all clones share readiness and the
/// close latch.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl OutboundHandle {
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>, ready: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            ready,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while the transport is open and accepting writes.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
            && !self.closed.load(Ordering::Acquire)
            && !self.tx.is_closed()
    }

    pub fn send_text(&self, text: String) -> Result<(), FeedError> {
        self.send(OutboundFrame::Text(text))
    }

    pub fn ping(&self) -> Result<(), FeedError> {
        self.send(OutboundFrame::Ping)
    }

    /// Closes the transport. Only the first call on any clone emits a close
    /// frame; later calls return `false`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.ready.store(false, Ordering::Release);
        let _ = self.tx.send(OutboundFrame::Close);
        true
    }

    fn send(&self, frame: OutboundFrame) -> Result<(), FeedError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FeedError::Transport("transport already closed".to_string()));
        }
        self.tx
            .send(frame)
            .map_err(|_| FeedError::Transport("outbound queue dropped".to_string()))
    }
}

/// One open physical connection.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: OutboundHandle,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(outbound: OutboundHandle, inbound: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens physical connections for the connection manager. Called once per
/// connection attempt; a returned link means the transport reported "open".
pub trait Connector: Send + Sync {
    fn connect(&self) -> impl Future<Output = Result<TransportLink, FeedError>> + Send;
}
