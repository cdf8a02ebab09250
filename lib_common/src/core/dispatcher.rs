//! # Message Dispatcher
//!
//! Classifies raw frames from the feed into acknowledgments, transaction
//! notifications, or anything else. Classification is pure; routing happens in
//! the connection manager's read loop.

use serde_json::Value;

use crate::core::error::FeedError;
use crate::core::transport::RawFrame;

/// Notification methods that carry a transaction payload.
pub const NOTIFICATION_METHODS: &[&str] = &["programNotification", "transactionNotification"];

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Acknowledgment {
        id: u64,
        subscription_handle: u64,
    },
    Notification {
        method: String,
        context: Option<Value>,
        /// The transaction-shaped value handed to the decode pipeline.
        payload: Value,
    },
    Unrecognized {
        raw: Value,
    },
}

/// Parses and classifies one frame. Only a parse failure is an error; every
/// well-formed JSON value maps to some [`InboundMessage`].
pub fn classify(frame: &RawFrame) -> Result<InboundMessage, FeedError> {
    let value: Value = serde_json::from_slice(frame.as_bytes())?;
    Ok(classify_value(value))
}

fn classify_value(value: Value) -> InboundMessage {
    if let Some((id, handle)) = as_acknowledgment(&value) {
        return InboundMessage::Acknowledgment {
            id,
            subscription_handle: handle,
        };
    }

    let method = value.get("method").and_then(Value::as_str);
    if let Some(method) = method.filter(|m| NOTIFICATION_METHODS.contains(m)) {
        let result = value.get("params").and_then(|p| p.get("result"));
        if let Some(payload) = result.and_then(transaction_payload) {
            return InboundMessage::Notification {
                method: method.to_string(),
                context: result.and_then(|r| r.get("context")).cloned(),
                payload: payload.clone(),
            };
        }
    }

    InboundMessage::Unrecognized { raw: value }
}

/// `{ "id": <number>, "result": <number> }`
fn as_acknowledgment(value: &Value) -> Option<(u64, u64)> {
    let id = as_whole_number(value.get("id")?)?;
    let handle = as_whole_number(value.get("result")?)?;
    Some((id, handle))
}

/// Non-negative integer, also when the server writes it as `7.0`.
fn as_whole_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64)
            .map(|f| f as u64)
    })
}

/// Finds the transaction-shaped value inside `params.result`: either
/// `result.value` (program notifications) or `result` itself (transaction
/// notifications), as long as it carries a non-null `transaction`.
fn transaction_payload(result: &Value) -> Option<&Value> {
    let has_tx = |v: &Value| v.get("transaction").is_some_and(|t| !t.is_null());

    match result.get("value") {
        Some(value) if has_tx(value) => Some(value),
        _ if has_tx(result) => Some(result),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(v: Value) -> RawFrame {
        RawFrame::Text(v.to_string())
    }

    #[test]
    fn test_ack_is_recognized() {
        let msg = classify(&text(json!({"jsonrpc": "2.0", "id": 420, "result": 7}))).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Acknowledgment { id: 420, subscription_handle: 7 }
        );
    }

    #[test]
    fn test_integral_float_ack_is_recognized() {
        let msg = classify(&text(json!({"id": 420, "result": 7.0}))).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Acknowledgment { id: 420, subscription_handle: 7 }
        );

        let msg = classify(&text(json!({"id": 420.0, "result": 7.5}))).unwrap();
        assert!(matches!(msg, InboundMessage::Unrecognized { .. }));

        let msg = classify(&text(json!({"id": 420, "result": -1}))).unwrap();
        assert!(matches!(msg, InboundMessage::Unrecognized { .. }));
    }

    #[test]
    fn test_non_numeric_result_is_not_an_ack() {
        let msg = classify(&text(json!({"id": 420, "result": "7"}))).unwrap();
        assert!(matches!(msg, InboundMessage::Unrecognized { .. }));

        let msg = classify(&text(json!({"id": 420, "error": {"code": -32602}}))).unwrap();
        assert!(matches!(msg, InboundMessage::Unrecognized { .. }));
    }

    #[test]
    fn test_program_notification_routes_value() {
        let frame = text(json!({
            "jsonrpc": "2.0",
            "method": "programNotification",
            "params": {
                "subscription": 7,
                "result": {
                    "context": {"slot": 1},
                    "value": {"transaction": {"signatures": ["sig"]}, "meta": {}}
                }
            }
        }));

        match classify(&frame).unwrap() {
            InboundMessage::Notification { method, context, payload } => {
                assert_eq!(method, "programNotification");
                assert_eq!(context, Some(json!({"slot": 1})));
                assert_eq!(payload["transaction"]["signatures"][0], "sig");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_transaction_notification_routes_result() {
        let frame = text(json!({
            "method": "transactionNotification",
            "params": {"result": {"signature": "abc", "transaction": {"meta": {}}, "slot": 3}}
        }));

        match classify(&frame).unwrap() {
            InboundMessage::Notification { payload, context, .. } => {
                assert_eq!(payload["signature"], "abc");
                assert_eq!(context, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_notification_without_transaction_is_unrecognized() {
        let frame = text(json!({
            "method": "programNotification",
            "params": {"result": {"context": {}, "value": {"account": {}}}}
        }));
        assert!(matches!(classify(&frame).unwrap(), InboundMessage::Unrecognized { .. }));

        let frame = text(json!({"method": "programNotification", "params": {}}));
        assert!(matches!(classify(&frame).unwrap(), InboundMessage::Unrecognized { .. }));
    }

    #[test]
    fn test_unknown_method_is_unrecognized() {
        let frame = text(json!({
            "method": "slotNotification",
            "params": {"result": {"value": {"transaction": {}}}}
        }));
        assert!(matches!(classify(&frame).unwrap(), InboundMessage::Unrecognized { .. }));
    }

    #[test]
    fn test_malformed_frame_is_parse_error() {
        let err = classify(&RawFrame::Text("{not json".to_string())).unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));

        let err = classify(&RawFrame::Binary(vec![0xff, 0x00])).unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }
}
