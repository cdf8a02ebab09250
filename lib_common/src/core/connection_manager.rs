//! # Connection Manager
//!
//! Keeps one transaction subscription alive. The manager owns the transport
//! link and the single [`ConnectionSession`], and drives the session through
//! its states one step at a time:
//!
//! - **Connecting**: ask the [`Connector`] for a link, send the subscribe
//!   request, wait for the acknowledgment.
//! - **AwaitingAck / Active**: consume transport events in arrival order.
//!   Frames go through the dispatcher; acks update the session and start the
//!   heartbeat; notifications go through the decode pipeline.
//! - **Closing**: stop the heartbeat, drop the link, forget the handle.
//! - **Backoff**: ask the [`BackoffPolicy`] for a delay, sleep, then start a
//!   fresh session with the attempt counter bumped. When the budget is spent the
//!   manager fails for good and [`ConnectionManager::run`] returns
//!   [`FeedError::RetryExhausted`].
//!
//! Shutdown is a cancellation token checked at every suspension point. It
//! cancels the backoff sleep and the heartbeat and closes the link exactly once.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::backoff::{BackoffDecision, BackoffPolicy};
use crate::core::dispatcher::{self, InboundMessage};
use crate::core::error::FeedError;
use crate::core::feed_config::FeedConfig;
use crate::core::heartbeat::HeartbeatMonitor;
use crate::core::pipeline::{DecodePipeline, EventSink, PipelineOutcome, TransactionDecoder};
use crate::core::session::{ConnectionSession, ConnectionState, StateChange, TerminalReason};
use crate::core::subscription::AckOutcome;
use crate::core::transport::{Connector, RawFrame, TransportEvent, TransportLink};

const STATE_CHANNEL_CAPACITY: usize = 64;

/// Requests a clean stop of a running [`ConnectionManager`]. Cloneable and
/// idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            log::info!("Shutdown requested.");
        }
        self.token.cancel();
    }
}

pub struct ConnectionManager<C, D, S> {
    connector: C,
    config: FeedConfig,
    pipeline: DecodePipeline<D, S>,
    session: ConnectionSession,
    link: Option<TransportLink>,
    heartbeat: Option<HeartbeatMonitor>,
    shutdown: CancellationToken,
    state_tx: broadcast::Sender<StateChange>,
}

impl<C, D, S> ConnectionManager<C, D, S>
where
    C: Connector,
    D: TransactionDecoder,
    S: EventSink,
{
    pub fn new(connector: C, config: FeedConfig, decoder: D, sink: S) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let pipeline = DecodePipeline::new(decoder, sink, config.filter.clone());
        let session = ConnectionSession::new(config.subscription.request_id);

        Self {
            connector,
            config,
            pipeline,
            session,
            link: None,
            heartbeat: None,
            shutdown: CancellationToken::new(),
            state_tx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Every transition from now on, in order.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn policy(&self) -> BackoffPolicy {
        self.config.backoff
    }

    /// Runs until shutdown (`Ok`) or until the reconnect budget is spent
    /// (`Err(RetryExhausted)`).
    pub async fn run(mut self) -> Result<(), FeedError> {
        loop {
            let state = self.session.state;

            if self.shutdown.is_cancelled() && !state.is_terminal() {
                self.stop()?;
                continue;
            }

            match state {
                ConnectionState::Idle => self.transition(ConnectionState::Connecting)?,
                ConnectionState::Connecting => self.open().await?,
                ConnectionState::AwaitingAck | ConnectionState::Active => self.read_next().await?,
                ConnectionState::Closing => self.close_session()?,
                ConnectionState::Backoff => self.wait_or_give_up().await?,
                ConnectionState::Failed(TerminalReason::Stopped) => return Ok(()),
                ConnectionState::Failed(TerminalReason::RetryExhausted) => {
                    return Err(FeedError::RetryExhausted {
                        attempts: self.session.attempt_count,
                        max: self.policy().max_attempts,
                    });
                }
            }
        }
    }

    async fn open(&mut self) -> Result<(), FeedError> {
        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            result = self.connector.connect() => Some(result),
        };

        let link = match opened {
            None => return self.stop(),
            Some(Ok(link)) => link,
            Some(Err(e)) => {
                log::error!("WebSocket error: {}", e);
                return self.transition(ConnectionState::Closing);
            }
        };

        log::info!("WebSocket is open");
        let outbound = link.outbound.clone();
        self.link = Some(link);
        self.transition(ConnectionState::AwaitingAck)?;

        let frame = self.config.subscription.request_frame()?;
        log::info!("Sending subscription request: {}", frame);
        if let Err(e) = outbound.send_text(frame) {
            log::error!("Failed to send subscription request: {}", e);
            return self.transition(ConnectionState::Closing);
        }
        Ok(())
    }

    async fn read_next(&mut self) -> Result<(), FeedError> {
        let received = match self.link.as_mut() {
            Some(link) => tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                event = link.inbound.recv() => Some(event),
            },
            None => return self.transition(ConnectionState::Closing),
        };
        let Some(event) = received else {
            return self.stop();
        };

        match event {
            Some(TransportEvent::Frame(frame)) => self.handle_frame(frame),
            Some(TransportEvent::Error(e)) => {
                log::error!("WebSocket error: {}", e);
                self.transition(ConnectionState::Closing)
            }
            Some(TransportEvent::Closed(reason)) => {
                log::warn!("WebSocket is closed: {}", reason.as_deref().unwrap_or("no reason"));
                self.transition(ConnectionState::Closing)
            }
            None => {
                log::warn!("WebSocket is closed: event stream ended");
                self.transition(ConnectionState::Closing)
            }
        }
    }

    /// Dispatches one inbound frame. Nothing in here fails the session: bad
    /// frames, stray acks and decoder errors are logged and dropped.
    pub fn handle_frame(&mut self, frame: RawFrame) -> Result<(), FeedError> {
        if !self.session.state.accepts_frames() {
            log::debug!("Ignoring frame received in state {}", self.session.state);
            return Ok(());
        }

        let message = match dispatcher::classify(&frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Failed to parse message: {}", e);
                return Ok(());
            }
        };

        match message {
            InboundMessage::Acknowledgment {
                id,
                subscription_handle,
            } => self.on_ack(id, subscription_handle),
            InboundMessage::Notification { method, payload, .. } => {
                match self.pipeline.process(&payload) {
                    PipelineOutcome::Delivered { signature } => {
                        log::debug!("{} delivered: {}", method, signature)
                    }
                    PipelineOutcome::Declined | PipelineOutcome::Filtered => {
                        log::trace!("{} not relevant to filter", method)
                    }
                    PipelineOutcome::Failed(e) => {
                        log::warn!("Error decoding transaction: {}", FeedError::from(e))
                    }
                }
                Ok(())
            }
            InboundMessage::Unrecognized { raw } => {
                log::debug!("Dropping unrecognized message: {}", raw);
                Ok(())
            }
        }
    }

    fn on_ack(&mut self, id: u64, handle: u64) -> Result<(), FeedError> {
        match self.config.subscription.accept_ack(&mut self.session, id, handle) {
            AckOutcome::Accepted(handle) => {
                log::info!("Successfully subscribed with ID: {}", handle);
                self.session.attempt_count = 0;
                self.transition(ConnectionState::Active)?;
                self.start_heartbeat();
            }
            AckOutcome::Duplicate { kept, ignored } => {
                let e = FeedError::ProtocolViolation(format!(
                    "duplicate acknowledgment for request {} (handle {} kept, {} ignored)",
                    id, kept, ignored
                ));
                log::warn!("{}", e);
            }
            AckOutcome::Mismatched { expected, received } => {
                let e = FeedError::ProtocolViolation(format!(
                    "acknowledgment for request {} while waiting on {}",
                    received, expected
                ));
                log::warn!("{}", e);
            }
        }
        Ok(())
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        if let Some(link) = &self.link {
            self.heartbeat = Some(HeartbeatMonitor::start(
                self.config.heartbeat_interval,
                link.outbound.clone(),
                &self.shutdown,
            ));
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }

    fn close_link(&mut self) {
        if let Some(link) = self.link.take() {
            if link.outbound.close() {
                log::debug!("Transport closed.");
            }
        }
    }

    fn close_session(&mut self) -> Result<(), FeedError> {
        self.stop_heartbeat();
        self.close_link();
        if let Some(handle) = self.session.subscription_handle.take() {
            log::info!("Last subscription ID was: {}", handle);
        }
        self.transition(ConnectionState::Backoff)
    }

    async fn wait_or_give_up(&mut self) -> Result<(), FeedError> {
        let policy = self.policy();
        let attempt = self.session.attempt_count;

        let delay = match policy.decide(attempt) {
            BackoffDecision::Retry(delay) => delay,
            BackoffDecision::Exhausted => {
                log::error!("==================================================================");
                log::error!(
                    "Max retry attempts reached ({}/{}). Please check your connection and try again.",
                    attempt,
                    policy.max_attempts
                );
                log::error!("==================================================================");
                return self.transition(ConnectionState::Failed(TerminalReason::RetryExhausted));
            }
        };

        log::info!(
            "Attempting to reconnect in {} seconds... (Attempt {}/{})",
            delay.as_secs_f64(),
            attempt + 1,
            policy.max_attempts
        );

        let elapsed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        };
        if !elapsed {
            return self.stop();
        }

        self.session = self.session.successor();
        self.transition(ConnectionState::Connecting)
    }

    /// Tears everything down and parks the session in `Failed(Stopped)`.
    fn stop(&mut self) -> Result<(), FeedError> {
        if self.session.state.is_terminal() {
            return Ok(());
        }
        if self.session.state.accepts_frames() {
            self.transition(ConnectionState::Closing)?;
        }
        self.stop_heartbeat();
        self.close_link();
        self.session.subscription_handle = None;
        self.transition(ConnectionState::Failed(TerminalReason::Stopped))
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), FeedError> {
        let from = self.session.state;
        if !from.can_transition_to(next) {
            return Err(FeedError::IllegalTransition { from, to: next });
        }

        self.session.state = next;
        log::info!(
            "Connection state: {} -> {} (attempt {})",
            from,
            next,
            self.session.attempt_count
        );
        let _ = self.state_tx.send(StateChange {
            from,
            to: next,
            attempt: self.session.attempt_count,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DecodeError;
    use crate::core::pipeline::DecodedEvent;
    use crate::core::transport::{OutboundFrame, OutboundHandle};
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct NeverConnects;

    impl Connector for NeverConnects {
        async fn connect(&self) -> Result<TransportLink, FeedError> {
            std::future::pending().await
        }
    }

    struct NoDecoder;

    impl TransactionDecoder for NoDecoder {
        fn decode(&self, _transaction: &Value) -> Result<Option<DecodedEvent>, DecodeError> {
            Ok(None)
        }
    }

    struct NoSink;

    impl EventSink for NoSink {
        fn accept(&mut self, _event: DecodedEvent, _signature: &str, _timestamp: DateTime<Utc>) {}
    }

    type TestManager = ConnectionManager<NeverConnects, NoDecoder, NoSink>;

    fn awaiting_ack() -> (TestManager, mpsc::UnboundedReceiver<OutboundFrame>) {
        let mut manager = ConnectionManager::new(NeverConnects, FeedConfig::default(), NoDecoder, NoSink);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_ev_tx, ev_rx) = mpsc::unbounded_channel();
        let outbound = OutboundHandle::new(out_tx, Arc::new(AtomicBool::new(true)));
        manager.link = Some(TransportLink::new(outbound, ev_rx));
        manager.session.state = ConnectionState::AwaitingAck;
        (manager, out_rx)
    }

    fn frame(v: Value) -> RawFrame {
        RawFrame::Text(v.to_string())
    }

    #[tokio::test]
    async fn test_ack_activates_and_resets_attempts() {
        let (mut manager, _out) = awaiting_ack();
        manager.session.attempt_count = 4;

        manager.handle_frame(frame(json!({"id": 420, "result": 7}))).unwrap();

        assert_eq!(manager.session.state, ConnectionState::Active);
        assert_eq!(manager.session.attempt_count, 0);
        assert_eq!(manager.session.subscription_handle, Some(7));
        assert!(manager.heartbeat.as_ref().is_some_and(|h| h.is_running()));
    }

    #[tokio::test]
    async fn test_mismatched_ack_keeps_waiting() {
        let (mut manager, _out) = awaiting_ack();

        manager.handle_frame(frame(json!({"id": 1, "result": 7}))).unwrap();

        assert_eq!(manager.session.state, ConnectionState::AwaitingAck);
        assert_eq!(manager.session.subscription_handle, None);
        assert!(manager.heartbeat.is_none());
    }

    #[tokio::test]
    async fn test_second_ack_is_ignored() {
        let (mut manager, _out) = awaiting_ack();
        let mut changes = manager.subscribe_state();

        manager.handle_frame(frame(json!({"id": 420, "result": 7}))).unwrap();
        manager.handle_frame(frame(json!({"id": 420, "result": 8}))).unwrap();

        assert_eq!(manager.session.state, ConnectionState::Active);
        assert_eq!(manager.session.subscription_handle, Some(7));
        assert_eq!(changes.try_recv().unwrap().to, ConnectionState::Active);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frames_do_not_move_state() {
        let (mut manager, _out) = awaiting_ack();

        manager.handle_frame(RawFrame::Text("{\"id\": 420,".to_string())).unwrap();
        manager.handle_frame(RawFrame::Binary(vec![0xde, 0xad])).unwrap();
        manager.handle_frame(frame(json!([1, 2, 3]))).unwrap();

        assert_eq!(manager.session.state, ConnectionState::AwaitingAck);
    }

    #[tokio::test]
    async fn test_frames_ignored_outside_reading_states() {
        let (mut manager, _out) = awaiting_ack();
        manager.session.state = ConnectionState::Backoff;

        manager.handle_frame(frame(json!({"id": 420, "result": 7}))).unwrap();

        assert_eq!(manager.session.state, ConnectionState::Backoff);
        assert_eq!(manager.session.subscription_handle, None);
    }

    #[tokio::test]
    async fn test_stop_closes_link_once() {
        let (mut manager, mut out) = awaiting_ack();

        manager.stop().unwrap();
        manager.stop().unwrap();

        assert_eq!(manager.session.state, ConnectionState::Failed(TerminalReason::Stopped));
        assert_eq!(out.try_recv().unwrap(), OutboundFrame::Close);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_silences_heartbeat_without_loop() {
        let (mut manager, mut out) = awaiting_ack();
        manager.handle_frame(frame(json!({"id": 420, "result": 7}))).unwrap();
        assert!(manager.heartbeat.as_ref().is_some_and(|h| h.is_running()));

        manager.shutdown_handle().shutdown();
        assert!(manager.heartbeat.as_ref().is_some_and(|h| !h.is_running()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(out.try_recv().is_err());
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut manager = ConnectionManager::new(NeverConnects, FeedConfig::default(), NoDecoder, NoSink);
        let err = manager.transition(ConnectionState::Active).unwrap_err();
        assert!(matches!(err, FeedError::IllegalTransition { .. }));
        assert_eq!(manager.session.state, ConnectionState::Idle);
    }
}
