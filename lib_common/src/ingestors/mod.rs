//! # Data Ingestors Module
//!
//! Concrete transports for the core feed engine. Each submodule implements
//! [`Connector`](crate::core::transport::Connector) for one data source and
//! hides the protocol details (TLS, framing, ping/pong) from the connection
//! manager.
//!
//! ## Contained Modules:
//! - **`helius_wss`**: WebSocket client for the Helius transaction stream.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The WebSocket transport for the Helius transaction stream.
pub mod helius_wss;

// --- Public API Re-exports ---
pub use helius_wss::{HeliusConfig, HeliusWssConnector};
