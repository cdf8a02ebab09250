//! # Subscription Protocol
//!
//! Builds the `transactionSubscribe` JSON-RPC request sent once per connection
//! attempt, and decides what an inbound acknowledgment means for the current
//! session.

use serde::{Deserialize, Serialize};

use crate::core::session::ConnectionSession;

pub const SUBSCRIBE_METHOD: &str = "transactionSubscribe";
pub const DEFAULT_REQUEST_ID: u64 = 420;
pub const DEFAULT_TARGET_ADDRESS: &str = "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA";

/// Options record of the subscribe request. Fixed configuration, never derived
/// at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    pub commitment: String,
    pub encoding: String,
    pub transaction_details: String,
    pub max_supported_transaction_version: u8,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            commitment: "processed".to_string(),
            encoding: "jsonParsed".to_string(),
            transaction_details: "full".to_string(),
            max_supported_transaction_version: 0,
        }
    }
}

/// Second element of `params`: either the address or the options record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubscribeParam {
    Address(String),
    Options(SubscriptionOptions),
}

/// The outbound JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: [SubscribeParam; 2],
}

/// Static subscription settings shared by every connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub request_id: u64,
    pub target_address: String,
    pub options: SubscriptionOptions,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            request_id: DEFAULT_REQUEST_ID,
            target_address: DEFAULT_TARGET_ADDRESS.to_string(),
            options: SubscriptionOptions::default(),
        }
    }
}

/// What an acknowledgment did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First matching ack: the handle is now the session's.
    Accepted(u64),
    /// Matching id, but the session already holds a handle. No-op.
    Duplicate { kept: u64, ignored: u64 },
    /// The id belongs to some other request.
    Mismatched { expected: u64, received: u64 },
}

impl SubscriptionConfig {
    pub fn build_request(&self) -> SubscribeRequest {
        SubscribeRequest {
            jsonrpc: "2.0",
            id: self.request_id,
            method: SUBSCRIBE_METHOD,
            params: [
                SubscribeParam::Address(self.target_address.clone()),
                SubscribeParam::Options(self.options.clone()),
            ],
        }
    }

    /// Serialized request, ready to hand to the transport.
    pub fn request_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.build_request())
    }

    /// Applies an acknowledgment to `session`. Only the first matching ack of a
    /// session changes anything.
    pub fn accept_ack(&self, session: &mut ConnectionSession, id: u64, handle: u64) -> AckOutcome {
        if id != session.request_id {
            return AckOutcome::Mismatched {
                expected: session.request_id,
                received: id,
            };
        }
        match session.subscription_handle {
            Some(kept) => AckOutcome::Duplicate {
                kept,
                ignored: handle,
            },
            None => {
                session.subscription_handle = Some(handle);
                AckOutcome::Accepted(handle)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let frame = SubscriptionConfig::default().request_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 420,
                "method": "transactionSubscribe",
                "params": [
                    "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA",
                    {
                        "commitment": "processed",
                        "encoding": "jsonParsed",
                        "transactionDetails": "full",
                        "maxSupportedTransactionVersion": 0
                    }
                ]
            })
        );
    }

    #[test]
    fn test_matching_ack_sets_handle() {
        let config = SubscriptionConfig::default();
        let mut session = ConnectionSession::new(config.request_id);

        assert_eq!(config.accept_ack(&mut session, 420, 7), AckOutcome::Accepted(7));
        assert_eq!(session.subscription_handle, Some(7));
    }

    #[test]
    fn test_mismatched_ack_leaves_session_alone() {
        let config = SubscriptionConfig::default();
        let mut session = ConnectionSession::new(config.request_id);

        assert_eq!(
            config.accept_ack(&mut session, 1, 7),
            AckOutcome::Mismatched { expected: 420, received: 1 }
        );
        assert_eq!(session.subscription_handle, None);
    }

    #[test]
    fn test_duplicate_ack_keeps_first_handle() {
        let config = SubscriptionConfig::default();
        let mut session = ConnectionSession::new(config.request_id);
        config.accept_ack(&mut session, 420, 7);

        assert_eq!(
            config.accept_ack(&mut session, 420, 9),
            AckOutcome::Duplicate { kept: 7, ignored: 9 }
        );
        assert_eq!(session.subscription_handle, Some(7));
    }
}
