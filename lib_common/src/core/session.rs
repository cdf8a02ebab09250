//! # Connection Session
//!
//! State owned by one physical connection, from open to close. The connection
//! manager holds exactly one [`ConnectionSession`] and replaces it wholesale on
//! every reconnect, so a subscription handle can never leak from one socket to
//! the next.
//!
//! Legal transitions:
//!
//! ```text
//! Idle        -> Connecting
//! Connecting  -> AwaitingAck | Closing
//! AwaitingAck -> Active | Closing
//! Active      -> Closing
//! Closing     -> Backoff
//! Backoff     -> Connecting
//! <any live>  -> Failed(Stopped)          (shutdown)
//! Backoff     -> Failed(RetryExhausted)
//! ```

use std::fmt;

use serde::Serialize;

/// Why a session ended for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminalReason {
    /// Shutdown was requested. Clean exit.
    Stopped,
    /// The reconnect budget ran out.
    RetryExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingAck,
    Active,
    Closing,
    Backoff,
    Failed(TerminalReason),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }

    /// States in which inbound frames are consumed.
    pub fn accepts_frames(&self) -> bool {
        matches!(self, ConnectionState::AwaitingAck | ConnectionState::Active)
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (*self, next) {
            (Failed(_), _) => false,
            (_, Failed(TerminalReason::Stopped)) => true,
            (Backoff, Failed(TerminalReason::RetryExhausted)) => true,
            (Idle, Connecting) => true,
            (Connecting, AwaitingAck) | (Connecting, Closing) => true,
            (AwaitingAck, Active) | (AwaitingAck, Closing) => true,
            (Active, Closing) => true,
            (Closing, Backoff) => true,
            (Backoff, Connecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Failed(TerminalReason::Stopped) => write!(f, "Stopped"),
            ConnectionState::Failed(TerminalReason::RetryExhausted) => write!(f, "Failed"),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A transition as published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub state: ConnectionState,
    pub attempt_count: u32,
    pub subscription_handle: Option<u64>,
    pub request_id: u64,
}

impl ConnectionSession {
    pub fn new(request_id: u64) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt_count: 0,
            subscription_handle: None,
            request_id,
        }
    }

    /// The session for the next connection attempt: attempt counter bumped,
    /// subscription handle gone, state still `Backoff` until the manager moves
    /// it on.
    pub fn successor(&self) -> Self {
        Self {
            state: self.state,
            attempt_count: self.attempt_count.saturating_add(1),
            subscription_handle: None,
            request_id: self.request_id,
        }
    }
}
