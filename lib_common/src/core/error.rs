//! # Feed Errors
//!
//! Error taxonomy for the transaction feed. Only [`FeedError::RetryExhausted`]
//! is fatal to the subsystem; every other variant is logged and the read loop
//! keeps going.

use thiserror::Error;

use crate::core::session::ConnectionState;

#[derive(Debug, Error)]
pub enum FeedError {
    /// An inbound frame was not valid JSON.
    #[error("Malformed inbound frame: {0}")]
    Parse(#[from] serde_json::Error),

    /// The decoder collaborator failed on a notification payload.
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Socket-level failure: connect, read or write.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected or duplicate acknowledgment.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The reconnect budget is spent. Operator intervention required.
    #[error("Max retry attempts reached ({attempts}/{max}). Please check your connection and try again.")]
    RetryExhausted { attempts: u32, max: u32 },

    #[error("Illegal state transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure reported by a [`TransactionDecoder`](crate::core::pipeline::TransactionDecoder).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Transaction payload is missing `{0}`")]
    MissingField(&'static str),

    #[error("Unexpected shape for `{field}`: {detail}")]
    InvalidShape { field: &'static str, detail: String },

    #[error("{0}")]
    Other(String),
}
