//! # Core Feed Engine
//!
//! Everything needed to keep one transaction subscription alive, independent
//! of the concrete transport and decoder.
//!
//! - **`connection_manager`**: the state machine. Owns the transport link and
//!   the session, reconnects with backoff, shuts down exactly once.
//! - **`session`**: connection states, the legal-transition table and the
//!   per-connection session value.
//! - **`backoff`**: deterministic exponential reconnect delays.
//! - **`heartbeat`**: periodic transport pings while a session is Active.
//! - **`subscription`**: the `transactionSubscribe` request and ack matching.
//! - **`dispatcher`**: classification of inbound frames.
//! - **`pipeline`**: decoder -> interest filter -> sink.
//! - **`transport`**: the seam between the manager and a real socket.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Deterministic exponential backoff.
pub mod backoff;
/// The connection lifecycle state machine.
pub mod connection_manager;
/// Classification of inbound frames.
pub mod dispatcher;
/// Error taxonomy.
pub mod error;
/// Assembled runtime settings for a feed.
pub mod feed_config;
/// Keepalive pings.
pub mod heartbeat;
/// Decode, filter and deliver notifications.
pub mod pipeline;
/// Connection states and the per-connection session.
pub mod session;
/// Subscribe request and acknowledgment matching.
pub mod subscription;
/// Transport abstraction.
pub mod transport;

// --- Public API Re-exports ---
pub use backoff::{BackoffDecision, BackoffPolicy};
pub use connection_manager::{ConnectionManager, ShutdownHandle};
pub use dispatcher::InboundMessage;
pub use error::{DecodeError, FeedError};
pub use feed_config::FeedConfig;
pub use heartbeat::HeartbeatMonitor;
pub use pipeline::{DecodePipeline, DecodedEvent, DecodedInstruction, EventSink, FilterCriteria, TransactionDecoder};
pub use session::{ConnectionSession, ConnectionState, StateChange, TerminalReason};
pub use subscription::{SubscriptionConfig, SubscriptionOptions};
pub use transport::{Connector, OutboundFrame, OutboundHandle, RawFrame, TransportEvent, TransportLink};
