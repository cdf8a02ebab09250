//! # Helius WSS Ingestor
//!
//! WebSocket transport for the Helius enhanced transaction stream.
//! Each `connect()` opens one socket and splits it into two tasks:
//!
//! - a **reader** that forwards text/binary frames to the connection manager
//!   and reports errors and closes as [`TransportEvent`]s;
//! - a **writer** that drains the outbound queue (subscribe request, pings,
//!   the final close).
//!
//! Both tasks end on their own once the manager drops the link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use url::Url;

use crate::core::error::FeedError;
use crate::core::transport::{
    Connector, OutboundFrame, OutboundHandle, RawFrame, TransportEvent, TransportLink,
};

pub const DEFAULT_WSS_URL: &str = "wss://atlas-mainnet.helius-rpc.com/";

/// Where to connect and with which credential.
#[derive(Debug, Clone)]
pub struct HeliusConfig {
    pub wss_url: String,
    pub api_key: Option<String>,
}

impl Default for HeliusConfig {
    fn default() -> Self {
        Self {
            wss_url: DEFAULT_WSS_URL.to_string(),
            api_key: None,
        }
    }
}

impl HeliusConfig {
    /// Full endpoint with the `api-key` query parameter. A `ws://` URL without a
    /// key is accepted for local endpoints.
    pub fn endpoint(&self) -> Result<Url, FeedError> {
        let mut url = Url::parse(&self.wss_url)
            .map_err(|e| FeedError::Config(format!("invalid WebSocket URL {}: {}", self.wss_url, e)))?;

        match url.scheme() {
            "wss" | "ws" => {}
            other => {
                return Err(FeedError::Config(format!(
                    "unsupported scheme '{}' (expected ws or wss)",
                    other
                )))
            }
        }

        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {
                url.query_pairs_mut().append_pair("api-key", key);
            }
            _ if url.scheme() == "wss" => {
                return Err(FeedError::Config("HELIUS_API_KEY is not set".to_string()));
            }
            _ => {}
        }
        Ok(url)
    }
}

/// Endpoint with the credential masked, for logs.
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "api-key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();

    if pairs.is_empty() {
        shown.set_query(None);
    } else {
        shown.query_pairs_mut().clear().extend_pairs(pairs);
    }
    shown.to_string()
}

pub struct HeliusWssConnector {
    endpoint: Url,
}

impl HeliusWssConnector {
    pub fn new(config: &HeliusConfig) -> Result<Self, FeedError> {
        Ok(Self {
            endpoint: config.endpoint()?,
        })
    }
}

impl Connector for HeliusWssConnector {
    async fn connect(&self) -> Result<TransportLink, FeedError> {
        log::info!("Connecting to Helius WSS: {}", redacted(&self.endpoint));

        let (ws_stream, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let ready = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let writer_ready = Arc::clone(&ready);
        let writer_events = ev_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let closing = frame == OutboundFrame::Close;
                let msg = match frame {
                    OutboundFrame::Text(text) => WsMessage::Text(text.into()),
                    OutboundFrame::Ping => WsMessage::Ping(Default::default()),
                    OutboundFrame::Close => WsMessage::Close(None),
                };

                if let Err(e) = write.send(msg).await {
                    writer_ready.store(false, Ordering::Release);
                    if !closing {
                        let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                    }
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_ready.store(false, Ordering::Release);
            let _ = write.close().await;
        });

        let reader_ready = Arc::clone(&ready);
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    // Link dropped by the manager; release the socket.
                    _ = ev_tx.closed() => return,
                    msg = read.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let event = match msg {
                    Ok(WsMessage::Text(text)) => TransportEvent::Frame(RawFrame::Text(text.to_string())),
                    Ok(WsMessage::Binary(bin)) => TransportEvent::Frame(RawFrame::Binary(bin.to_vec())),
                    Ok(WsMessage::Close(frame)) => {
                        reader_ready.store(false, Ordering::Release);
                        let reason = frame.map(|f| format!("{} {}", f.code, f.reason.as_str()));
                        let _ = ev_tx.send(TransportEvent::Closed(reason));
                        return;
                    }
                    // Pings are answered by tungstenite; pongs need nothing.
                    Ok(_) => continue,
                    Err(e) => {
                        reader_ready.store(false, Ordering::Release);
                        let _ = ev_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };

                if ev_tx.send(event).is_err() {
                    return;
                }
            }
            reader_ready.store(false, Ordering::Release);
            let _ = ev_tx.send(TransportEvent::Closed(None));
        });

        Ok(TransportLink::new(OutboundHandle::new(out_tx, ready), ev_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_api_key() {
        let config = HeliusConfig {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let url = config.endpoint().unwrap();
        assert_eq!(url.as_str(), "wss://atlas-mainnet.helius-rpc.com/?api-key=secret");
        assert_eq!(redacted(&url), "wss://atlas-mainnet.helius-rpc.com/?api-key=***");
    }

    #[test]
    fn test_wss_without_key_is_rejected() {
        let config = HeliusConfig {
            api_key: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.endpoint(), Err(FeedError::Config(_))));
    }

    #[test]
    fn test_local_ws_without_key_is_allowed() {
        let config = HeliusConfig {
            wss_url: "ws://127.0.0.1:9000/".to_string(),
            api_key: None,
        };
        assert_eq!(config.endpoint().unwrap().as_str(), "ws://127.0.0.1:9000/");
    }

    #[test]
    fn test_bad_scheme_is_rejected() {
        let config = HeliusConfig {
            wss_url: "https://atlas-mainnet.helius-rpc.com/".to_string(),
            api_key: Some("k".to_string()),
        };
        assert!(matches!(config.endpoint(), Err(FeedError::Config(_))));
    }
}
