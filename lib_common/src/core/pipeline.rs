//! # Decode Pipeline
//!
//! Turns a transaction notification into a filtered [`DecodedEvent`] and hands
//! it to the sink:
//!
//! 1. The decoder collaborator parses the raw transaction. It always runs;
//!    relevance is only known once instruction program ids are parsed.
//! 2. Instructions that do not touch a program in [`FilterCriteria`] are
//!    dropped. If none are left, the event is discarded silently.
//! 3. Survivors go to the [`EventSink`] together with the transaction
//!    signature and the receive timestamp.
//!
//! Decoder failures are logged and swallowed; nothing in here can take the read
//! loop down.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::DecodeError;

pub const PUMP_AMM_PROGRAM_ID: &str = "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA";
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Program ids of interest. Fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    program_ids: BTreeSet<String>,
}

impl FilterCriteria {
    pub fn new<I, S>(program_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program_ids: program_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, program_id: &str) -> bool {
        self.program_ids.contains(program_id)
    }

    pub fn program_ids(&self) -> impl Iterator<Item = &str> {
        self.program_ids.iter().map(String::as_str)
    }
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self::new([PUMP_AMM_PROGRAM_ID, TOKEN_PROGRAM_ID])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    pub program_id: String,
    pub name: String,
    pub accounts: Vec<String>,
    /// Raw instruction data (base58) when the node could not parse it.
    pub data: Option<String>,
    /// Parsed instruction arguments when the node could.
    pub info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub instructions: Vec<DecodedInstruction>,
    pub inner_instructions: Vec<DecodedInstruction>,
    /// Base64 payloads of `Program data:` log lines.
    pub program_data: Vec<String>,
}

impl DecodedEvent {
    /// Keeps only the instructions that touch `filter`. Returns `false` when no
    /// outer instruction survives, which means the event is not relevant.
    pub fn retain_relevant(&mut self, filter: &FilterCriteria) -> bool {
        self.instructions.retain(|ix| filter.contains(&ix.program_id));
        self.inner_instructions.retain(|ix| filter.contains(&ix.program_id));
        !self.instructions.is_empty()
    }
}

/// Decoder collaborator. `Ok(None)` means "nothing here for me".
pub trait TransactionDecoder: Send {
    fn decode(&self, transaction: &Value) -> Result<Option<DecodedEvent>, DecodeError>;
}

/// Sink collaborator. Called synchronously from the read path.
pub trait EventSink: Send {
    fn accept(&mut self, event: DecodedEvent, signature: &str, timestamp: DateTime<Utc>);
}

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Delivered { signature: String },
    Declined,
    Filtered,
    Failed(DecodeError),
}

pub struct DecodePipeline<D, S> {
    decoder: D,
    sink: S,
    filter: FilterCriteria,
}

impl<D: TransactionDecoder, S: EventSink> DecodePipeline<D, S> {
    pub fn new(decoder: D, sink: S, filter: FilterCriteria) -> Self {
        Self {
            decoder,
            sink,
            filter,
        }
    }

    pub fn process(&mut self, payload: &Value) -> PipelineOutcome {
        let received_at = Utc::now();

        let mut event = match self.decoder.decode(payload) {
            Ok(Some(event)) => event,
            Ok(None) => return PipelineOutcome::Declined,
            Err(e) => return PipelineOutcome::Failed(e),
        };

        if !event.retain_relevant(&self.filter) {
            return PipelineOutcome::Filtered;
        }

        let signature = transaction_signature(payload).unwrap_or_default();
        self.sink.accept(event, &signature, received_at);
        PipelineOutcome::Delivered { signature }
    }
}

/// First signature of the transaction, looking through the wrappers the
/// different notification flavours use.
pub fn transaction_signature(payload: &Value) -> Option<String> {
    if let Some(sig) = payload.get("signature").and_then(Value::as_str) {
        return Some(sig.to_string());
    }

    let mut tx = payload.get("transaction")?;
    loop {
        if let Some(sig) = tx
            .get("signatures")
            .and_then(|s| s.get(0))
            .and_then(Value::as_str)
        {
            return Some(sig.to_string());
        }
        tx = tx.get("transaction")?;
    }
}
