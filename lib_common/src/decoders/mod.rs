//! # Decoders Module
//!
//! Decoder collaborators for the decode pipeline.
//!
//! - **`json_parsed`**: lists the instructions of a `jsonParsed` Solana
//!   transaction with their program ids.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Decoder for `encoding: "jsonParsed"` transactions.
pub mod json_parsed;

pub use json_parsed::JsonParsedDecoder;
