use chrono::{DateTime, Utc};

use lib_common::core::pipeline::{DecodedEvent, EventSink};

const EXPLORER_BASE_URL: &str = "https://translator.shyft.to/tx/";

pub fn explorer_link(signature: &str) -> String {
    format!("{}{}", EXPLORER_BASE_URL, signature)
}

/// Writes every delivered event to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    delivered: u64,
}

impl EventSink for LogSink {
    fn accept(&mut self, event: DecodedEvent, signature: &str, timestamp: DateTime<Utc>) {
        self.delivered += 1;

        log::info!(
            "Transaction #{} received at {}: {}",
            self.delivered,
            timestamp.to_rfc3339(),
            explorer_link(signature)
        );

        match serde_json::to_string_pretty(&event) {
            Ok(pretty) => log::info!("Decoded transaction {}:\n{}", signature, pretty),
            Err(e) => log::warn!("Could not render decoded transaction {}: {}", signature, e),
        }
    }
}
