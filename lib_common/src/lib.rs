//! # lib_common
//!
//! Shared library for the txstream workspace. Every top-level module is gated
//! behind a cargo feature of the same name so binaries only pay for what they
//! use (`full` enables everything).
//!
//! - **`core`**: the connection lifecycle state machine and everything it drives
//!   (backoff, heartbeat, subscription protocol, dispatcher, decode pipeline).
//! - **`ingestors`**: concrete transports for the core, currently the Helius
//!   WebSocket feed.
//! - **`decoders`**: decoder collaborators that turn raw transactions into
//!   structured events.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "decoders")]
pub mod decoders;
