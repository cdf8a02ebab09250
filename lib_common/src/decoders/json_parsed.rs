//! # jsonParsed Transaction Decoder
//!
//! Default decoder collaborator. Reads a transaction delivered with
//! `encoding: "jsonParsed"` and lists its outer and inner instructions with
//! their program ids, so the pipeline can filter on them. Instructions the
//! node could parse keep their `parsed.type` as name and `parsed.info` as
//! arguments; the rest keep their raw accounts and data.
//!
//! Failed transactions (`meta.err` set) and transactions without `meta` are
//! declined.

use serde_json::Value;

use crate::core::error::DecodeError;
use crate::core::pipeline::{DecodedEvent, DecodedInstruction, TransactionDecoder};

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParsedDecoder;

impl TransactionDecoder for JsonParsedDecoder {
    fn decode(&self, payload: &Value) -> Result<Option<DecodedEvent>, DecodeError> {
        let tx = payload
            .get("transaction")
            .filter(|t| t.is_object())
            .ok_or(DecodeError::MissingField("transaction"))?;

        // Helius wraps `{ transaction, meta }` one level deeper than the
        // program notification does.
        let (body, meta) = match tx.get("transaction") {
            Some(inner) if inner.is_object() => (inner, tx.get("meta")),
            _ => (tx, payload.get("meta")),
        };

        let meta = match meta {
            Some(meta) if meta.is_object() => meta,
            _ => return Ok(None),
        };
        if meta.get("err").is_some_and(|e| !e.is_null()) {
            return Ok(None);
        }

        let message = body.get("message").ok_or(DecodeError::MissingField("message"))?;
        let account_keys = message
            .get("accountKeys")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let instructions = array_of(message, "instructions")?
            .iter()
            .map(|ix| decode_instruction(ix, account_keys))
            .collect::<Result<Vec<_>, _>>()?;

        let mut inner_instructions = Vec::new();
        for group in optional_array(meta, "innerInstructions")? {
            for ix in array_of(group, "instructions")? {
                inner_instructions.push(decode_instruction(ix, account_keys)?);
            }
        }

        let program_data = optional_array(meta, "logMessages")?
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|line| line.strip_prefix(PROGRAM_DATA_PREFIX))
            .map(str::to_string)
            .collect();

        Ok(Some(DecodedEvent {
            instructions,
            inner_instructions,
            program_data,
        }))
    }
}

fn array_of<'a>(value: &'a Value, field: &'static str) -> Result<&'a [Value], DecodeError> {
    match value.get(field) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(DecodeError::InvalidShape {
            field,
            detail: format!("expected array, got {}", kind(other)),
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

fn optional_array<'a>(value: &'a Value, field: &'static str) -> Result<&'a [Value], DecodeError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(_) => array_of(value, field),
    }
}

/// Account key as a string, whether the node sent a bare key or an object
/// with `pubkey`.
fn key_str(key: &Value) -> Option<&str> {
    key.as_str().or_else(|| key.get("pubkey").and_then(Value::as_str))
}

fn resolve_index(index: &Value, account_keys: &[Value]) -> Option<String> {
    let i = usize::try_from(index.as_u64()?).ok()?;
    account_keys.get(i).and_then(key_str).map(str::to_string)
}

fn decode_instruction(ix: &Value, account_keys: &[Value]) -> Result<DecodedInstruction, DecodeError> {
    let program_id = match ix.get("programId").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => ix
            .get("programIdIndex")
            .and_then(|i| resolve_index(i, account_keys))
            .ok_or(DecodeError::MissingField("programId"))?,
    };

    let parsed = ix.get("parsed");
    let name = parsed
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
        .or_else(|| ix.get("program").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();

    let info = parsed.map(|p| p.get("info").cloned().unwrap_or_else(|| p.clone()));

    let accounts = match ix.get("accounts").and_then(Value::as_array) {
        Some(accounts) => accounts
            .iter()
            .filter_map(|a| {
                key_str(a)
                    .map(str::to_string)
                    .or_else(|| resolve_index(a, account_keys))
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(DecodedInstruction {
        program_id,
        name,
        accounts,
        data: ix.get("data").and_then(Value::as_str).map(str::to_string),
        info,
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::{PUMP_AMM_PROGRAM_ID, TOKEN_PROGRAM_ID};
    use serde_json::json;

    fn helius_payload(err: Value) -> Value {
        json!({
            "signature": "5xSig",
            "slot": 312,
            "transaction": {
                "transaction": {
                    "signatures": ["5xSig"],
                    "message": {
                        "accountKeys": [
                            {"pubkey": "User1111111111111111111111111111111111111", "signer": true},
                            {"pubkey": PUMP_AMM_PROGRAM_ID, "signer": false}
                        ],
                        "instructions": [
                            {
                                "programId": "ComputeBudget111111111111111111111111111111",
                                "accounts": [],
                                "data": "3DdGGhkhJbjm"
                            },
                            {
                                "programId": PUMP_AMM_PROGRAM_ID,
                                "accounts": ["Pool1111111111111111111111111111111111111", "User1111111111111111111111111111111111111"],
                                "data": "AJTQ2h9DXrBZ"
                            }
                        ]
                    }
                },
                "meta": {
                    "err": err,
                    "innerInstructions": [
                        {
                            "index": 1,
                            "instructions": [
                                {
                                    "program": "spl-token",
                                    "programId": TOKEN_PROGRAM_ID,
                                    "parsed": {
                                        "type": "transferChecked",
                                        "info": {"amount": "1000", "mint": "Mint111"}
                                    }
                                }
                            ]
                        }
                    ],
                    "logMessages": [
                        "Program pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA invoke [1]",
                        "Program data: Z/RSHyz1d3c=",
                        "Program pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA success"
                    ]
                }
            }
        })
    }

    #[test]
    fn test_decodes_outer_and_inner_instructions() {
        let event = JsonParsedDecoder.decode(&helius_payload(Value::Null)).unwrap().unwrap();

        assert_eq!(event.instructions.len(), 2);
        let swap = &event.instructions[1];
        assert_eq!(swap.program_id, PUMP_AMM_PROGRAM_ID);
        assert_eq!(swap.name, "unknown");
        assert_eq!(swap.accounts.len(), 2);
        assert_eq!(swap.data.as_deref(), Some("AJTQ2h9DXrBZ"));

        assert_eq!(event.inner_instructions.len(), 1);
        let transfer = &event.inner_instructions[0];
        assert_eq!(transfer.program_id, TOKEN_PROGRAM_ID);
        assert_eq!(transfer.name, "transferChecked");
        assert_eq!(transfer.info.as_ref().unwrap()["amount"], "1000");

        assert_eq!(event.program_data, vec!["Z/RSHyz1d3c=".to_string()]);
    }

    #[test]
    fn test_failed_transaction_is_declined() {
        let payload = helius_payload(json!({"InstructionError": [1, {"Custom": 6001}]}));
        assert_eq!(JsonParsedDecoder.decode(&payload).unwrap(), None);
    }

    #[test]
    fn test_missing_meta_is_declined() {
        let payload = json!({"transaction": {"signatures": ["s"], "message": {"instructions": []}}});
        assert_eq!(JsonParsedDecoder.decode(&payload).unwrap(), None);
    }

    #[test]
    fn test_program_notification_layout_with_indices() {
        let payload = json!({
            "transaction": {
                "signatures": ["s"],
                "message": {
                    "accountKeys": ["Payer", PUMP_AMM_PROGRAM_ID, "Pool"],
                    "instructions": [{"programIdIndex": 1, "accounts": [0, 2], "data": "x"}]
                }
            },
            "meta": {"err": null}
        });

        let event = JsonParsedDecoder.decode(&payload).unwrap().unwrap();
        assert_eq!(event.instructions[0].program_id, PUMP_AMM_PROGRAM_ID);
        assert_eq!(event.instructions[0].accounts, vec!["Payer".to_string(), "Pool".to_string()]);
        assert!(event.inner_instructions.is_empty());
    }

    #[test]
    fn test_shape_errors() {
        assert_eq!(
            JsonParsedDecoder.decode(&json!({"meta": {}})).unwrap_err(),
            DecodeError::MissingField("transaction")
        );

        let no_message = json!({"transaction": {"signatures": []}, "meta": {"err": null}});
        assert_eq!(
            JsonParsedDecoder.decode(&no_message).unwrap_err(),
            DecodeError::MissingField("message")
        );

        let bad_instructions = json!({
            "transaction": {"message": {"instructions": "nope"}},
            "meta": {"err": null}
        });
        assert!(matches!(
            JsonParsedDecoder.decode(&bad_instructions).unwrap_err(),
            DecodeError::InvalidShape { field: "instructions", .. }
        ));
    }
}
