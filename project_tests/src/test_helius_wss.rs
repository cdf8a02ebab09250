use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Message;

use lib_common::core::connection_manager::ConnectionManager;
use lib_common::core::feed_config::FeedConfig;
use lib_common::core::session::{ConnectionState, TerminalReason};
use lib_common::core::transport::Connector;
use lib_common::decoders::JsonParsedDecoder;
use lib_common::ingestors::{HeliusConfig, HeliusWssConnector};
use project_tests::{ack, pump_notification, wait_for, RecordingSink};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts one client, acknowledges its subscription, pushes one notification
/// and hangs up. Returns the subscribe request it received.
async fn serve_once(listener: TcpListener) -> Value {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    let request = loop {
        match ws.next().await {
            Some(Ok(msg)) if msg.is_text() => break msg.to_text().unwrap().to_string(),
            Some(Ok(_)) => continue,
            other => panic!("client went away before subscribing: {:?}", other),
        }
    };

    ws.send(Message::Text(ack(420, 99).to_string().into())).await.unwrap();
    ws.send(Message::Text(pump_notification("5xOverTheWire").to_string().into()))
        .await
        .unwrap();
    ws.close(None).await.unwrap();

    serde_json::from_str(&request).unwrap()
}

#[tokio::test]
async fn test_helius_connector_against_local_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_once(listener));

    let connector = HeliusWssConnector::new(&HeliusConfig {
        wss_url: format!("ws://{}/", addr),
        api_key: None,
    })
    .unwrap();

    let sink = RecordingSink::default();
    let manager = ConnectionManager::new(connector, FeedConfig::default(), JsonParsedDecoder, sink.clone());
    let mut states = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());

    let change = timeout(TEST_TIMEOUT, wait_for(&mut states, ConnectionState::Active))
        .await
        .unwrap();
    assert_eq!(change.from, ConnectionState::AwaitingAck);

    // The server hangs up after the notification.
    timeout(TEST_TIMEOUT, wait_for(&mut states, ConnectionState::Backoff))
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert_eq!(request["method"], "transactionSubscribe");
    assert_eq!(request["params"][1]["commitment"], "processed");

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "5xOverTheWire");

    shutdown.shutdown();
    timeout(
        TEST_TIMEOUT,
        wait_for(&mut states, ConnectionState::Failed(TerminalReason::Stopped)),
    )
    .await
    .unwrap();
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unreachable_endpoint_goes_to_backoff() {
    // Bind and drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let connector = HeliusWssConnector::new(&HeliusConfig {
        wss_url: format!("ws://{}/", addr),
        api_key: None,
    })
    .unwrap();

    let manager = ConnectionManager::new(
        connector,
        FeedConfig::default(),
        JsonParsedDecoder,
        RecordingSink::default(),
    );
    let mut states = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());

    let change = timeout(TEST_TIMEOUT, wait_for(&mut states, ConnectionState::Closing))
        .await
        .unwrap();
    assert_eq!(change.from, ConnectionState::Connecting);
    timeout(TEST_TIMEOUT, wait_for(&mut states, ConnectionState::Backoff))
        .await
        .unwrap();

    shutdown.shutdown();
    assert!(timeout(TEST_TIMEOUT, run).await.unwrap().unwrap().is_ok());
}

/// Completes the upgrade by hand and then never says a word, so the only way
/// the socket closes is the client letting go of it.
async fn upgrade_and_stay_silent(stream: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "client hung up during the handshake");
        request.extend_from_slice(&buf[..n]);
    }

    let request = String::from_utf8(request).unwrap();
    let key = request
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("sec-websocket-key").then(|| value.trim().to_string())
        })
        .unwrap();

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    );
    stream.write_all(response.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn test_dropped_link_releases_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        upgrade_and_stay_silent(&mut stream).await;

        // A close frame may arrive first; what matters is EOF.
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    });

    let connector = HeliusWssConnector::new(&HeliusConfig {
        wss_url: format!("ws://{}/", addr),
        api_key: None,
    })
    .unwrap();

    let link = timeout(TEST_TIMEOUT, connector.connect()).await.unwrap().unwrap();
    drop(link);

    timeout(TEST_TIMEOUT, server)
        .await
        .expect("socket still open after the link was dropped")
        .unwrap();
}
