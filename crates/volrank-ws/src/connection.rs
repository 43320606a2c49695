//! WebSocket connection manager.
//!
//! Handles the connection lifecycle, liveness detection and fixed-delay
//! reconnection. The stream a connection should carry is kept as explicit
//! state and re-subscribed every time a new transport opens, so a
//! reconnect never depends on the URL it was originally dialled with.

use crate::error::{WsError, WsResult};
use crate::heartbeat::{LivenessDeadline, DEFAULT_KEEP_ALIVE_WINDOW};
use crate::message::{parse_control_response, ControlFrame, ControlMethod};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Capacity of the outbound control-frame queue.
const OUTBOUND_CAPACITY: usize = 64;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Label used in logs (e.g. "ticker", "trade-3", "user").
    pub name: String,
    /// WebSocket URL. Never rewritten after construction.
    pub url: String,
    /// Stream to subscribe to on every open, if any.
    pub initial_stream: Option<String>,
    /// Inbound silence tolerated before the transport is dropped.
    pub keep_alive_window_ms: u64,
    /// Fixed delay before every reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Maximum consecutive failed connection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "stream".to_string(),
            url: String::new(),
            initial_stream: None,
            keep_alive_window_ms: DEFAULT_KEEP_ALIVE_WINDOW.as_millis() as u64,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 0, // Infinite
        }
    }
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.initial_stream = Some(stream.into());
        self
    }

    fn keep_alive_window(&self) -> Duration {
        Duration::from_millis(self.keep_alive_window_ms)
    }

    fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Closing,
}

/// Event delivered to the owner of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A transport opened and the desired stream was (re)subscribed.
    Opened,
    /// A data frame. Control acknowledgements are never forwarded.
    Message { text: String, received_at_ms: i64 },
    /// No inbound activity within the keep-alive window; a reconnect follows.
    TimedOut,
    /// The connection stopped for good.
    Closed,
}

/// Operations a subscription owner needs from a stream connection.
pub trait StreamControl: Send + Sync {
    /// Make `stream` the desired stream and request it from the server.
    fn subscribe(&self, stream: &str) -> WsResult<()>;

    /// Drop `stream` from the connection.
    fn unsubscribe(&self, stream: &str) -> WsResult<()>;

    /// Stream the connection resumes on every open.
    fn current_stream(&self) -> Option<String>;

    /// Stop the connection for good.
    fn close(&self);
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    desired_stream: RwLock<Option<String>>,
    /// Next control-frame id; advanced only when a frame is accepted.
    next_request_id: Mutex<u64>,
    event_tx: mpsc::Sender<StreamEvent>,
    /// Outbound control frames (serialized), drained by the message loop.
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    /// Cancels the liveness wait and any pending reconnect.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new(config: ConnectionConfig, event_tx: mpsc::Sender<StreamEvent>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let desired_stream = RwLock::new(config.initial_stream.clone());
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            desired_stream,
            next_request_id: Mutex::new(0),
            event_tx,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Run the connection on its own task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<WsResult<()>> {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let result = conn.connect().await;
            if let Err(e) = &result {
                error!(connection = %conn.config.name, error = %e, "Connection task ended with error");
            }
            result
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Check if close has been requested.
    pub fn is_closed(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn desired_stream(&self) -> Option<String> {
        self.desired_stream.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Queue a control frame. Only valid while the transport is open.
    ///
    /// Returns the request id attached to the frame.
    pub fn send(&self, method: ControlMethod, stream: &str) -> WsResult<u64> {
        if !self.is_open() {
            return Err(WsError::NotConnected(self.config.name.clone()));
        }

        let mut next_id = self.next_request_id.lock();
        let id = *next_id;
        let text = serde_json::to_string(&ControlFrame::new(method, stream, id))?;
        self.outbound_tx
            .try_send(text)
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        *next_id += 1;

        debug!(connection = %self.config.name, %method, stream, id, "Control frame queued");
        Ok(id)
    }

    /// Request graceful shutdown. Idempotent.
    pub fn close(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        info!(connection = %self.config.name, "Close requested");
        self.set_state(ConnectionState::Closing);
        self.shutdown_token.cancel();
    }

    /// Connect and keep the connection alive until [`close`](Self::close).
    pub async fn connect(&self) -> WsResult<()> {
        let result = self.connect_with_retry().await;
        self.set_state(ConnectionState::Disconnected);
        if self.event_tx.send(StreamEvent::Closed).await.is_err() {
            debug!(connection = %self.config.name, "Event receiver dropped before close");
        }
        result
    }

    async fn connect_with_retry(&self) -> WsResult<()> {
        let mut failed_attempts = 0u32;

        loop {
            if self.is_closed() {
                info!(connection = %self.config.name, "Close requested, exiting connect loop");
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            match self.try_connect().await {
                Ok(()) => return Ok(()),
                Err(WsError::HeartbeatTimeout) => {
                    // The transport was healthy once; start counting afresh.
                    failed_attempts = 0;
                }
                Err(e) => {
                    failed_attempts += 1;
                    error!(
                        connection = %self.config.name,
                        attempt = failed_attempts,
                        error = %e,
                        "WebSocket connection attempt failed"
                    );

                    if self.config.max_reconnect_attempts > 0
                        && failed_attempts >= self.config.max_reconnect_attempts
                    {
                        error!(connection = %self.config.name, failed_attempts, "Max reconnection attempts reached");
                        return Err(WsError::ConnectionFailed(
                            "Max reconnection attempts reached".to_string(),
                        ));
                    }
                }
            }

            if self.is_closed() {
                return Ok(());
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = self.config.reconnect_delay();
            warn!(
                connection = %self.config.name,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!(connection = %self.config.name, "Close requested during reconnect delay");
                    return Ok(());
                }
            }
        }
    }

    /// Run one transport until close (`Ok`) or liveness timeout
    /// (`Err(HeartbeatTimeout)`). Any other error is a failed attempt.
    async fn try_connect(&self) -> WsResult<()> {
        info!(connection = %self.config.name, url = %self.config.url, "Connecting to WebSocket");

        // TCP_NODELAY for lower latency
        let (ws_stream, _response) = tokio::select! {
            result = connect_async_tls_with_config(&self.config.url, None, true, None) => result?,
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        // Frames queued for a previous transport are superseded by the
        // subscription sent below.
        let mut outbound_rx = self.outbound_rx.lock().await;
        let mut stale = 0usize;
        while outbound_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(connection = %self.config.name, stale, "Discarded stale control frames");
        }

        self.set_state(ConnectionState::Open);
        let mut deadline = LivenessDeadline::new(self.config.keep_alive_window(), Instant::now());
        info!(connection = %self.config.name, "WebSocket connected");

        self.restore_subscription(&mut write).await;
        self.emit(StreamEvent::Opened).await;

        let mut reading = true;

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!(connection = %self.config.name, "Close signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(connection = %self.config.name, error = %e, "Failed to send Close frame");
                    }
                    return Ok(());
                }

                // Ahead of the deadline so a frame arriving at expiry wins.
                msg = read.next(), if reading => {
                    match msg {
                        Some(Ok(frame)) => {
                            deadline.touch(Instant::now());
                            match frame {
                                Message::Text(text) => self.handle_text_message(text).await,
                                Message::Ping(data) => {
                                    if let Err(e) = write.send(Message::Pong(data)).await {
                                        warn!(connection = %self.config.name, error = %e, "Failed to answer ping");
                                    }
                                }
                                Message::Close(frame) => {
                                    let reason = frame
                                        .map(|f| format!("{}: {}", u16::from(f.code), f.reason))
                                        .unwrap_or_else(|| "no reason".to_string());
                                    warn!(connection = %self.config.name, %reason, "WebSocket closed by server");
                                    reading = false;
                                }
                                _ => {}
                            }
                        }
                        Some(Err(e)) => {
                            warn!(connection = %self.config.name, error = %e, "WebSocket read error");
                            reading = false;
                        }
                        None => {
                            warn!(connection = %self.config.name, "WebSocket stream ended");
                            reading = false;
                        }
                    }
                }

                () = tokio::time::sleep_until(deadline.expires_at()) => {
                    warn!(
                        connection = %self.config.name,
                        window_ms = deadline.window().as_millis() as u64,
                        "No inbound activity within keep-alive window"
                    );
                    self.emit(StreamEvent::TimedOut).await;
                    return Err(WsError::HeartbeatTimeout);
                }

                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(connection = %self.config.name, error = %e, "Failed to send control frame");
                    }
                }
            }
        }
    }

    async fn restore_subscription(&self, write: &mut WsSink) {
        let Some(stream) = self.desired_stream() else {
            return;
        };

        // Reserved up front: the lock cannot be held across the write.
        let id = {
            let mut next_id = self.next_request_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let frame = ControlFrame::subscribe(stream.as_str(), id);
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!(connection = %self.config.name, error = %e, "Failed to encode subscription");
                return;
            }
        };

        match write.send(Message::Text(text)).await {
            Ok(()) => {
                info!(connection = %self.config.name, %stream, id, "Subscription restored");
            }
            Err(e) => {
                warn!(connection = %self.config.name, %stream, error = %e, "Failed to restore subscription");
            }
        }
    }

    async fn handle_text_message(&self, text: String) {
        let received_at_ms = chrono::Utc::now().timestamp_millis();

        if let Some(ack) = parse_control_response(&text) {
            match ack.error {
                Some(err) => warn!(
                    connection = %self.config.name,
                    id = ack.id,
                    code = err.code,
                    msg = %err.msg,
                    "Control frame rejected"
                ),
                None => debug!(connection = %self.config.name, id = ack.id, "Control frame acknowledged"),
            }
            return;
        }

        self.emit(StreamEvent::Message {
            text,
            received_at_ms,
        })
        .await;
    }

    async fn emit(&self, event: StreamEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!(connection = %self.config.name, "Event receiver dropped");
        }
    }
}

impl StreamControl for ConnectionManager {
    fn subscribe(&self, stream: &str) -> WsResult<()> {
        *self.desired_stream.write() = Some(stream.to_string());
        self.send(ControlMethod::Subscribe, stream).map(|_| ())
    }

    fn unsubscribe(&self, stream: &str) -> WsResult<()> {
        {
            let mut desired = self.desired_stream.write();
            if desired.as_deref() == Some(stream) {
                *desired = None;
            }
        }
        self.send(ControlMethod::Unsubscribe, stream).map(|_| ())
    }

    fn current_stream(&self) -> Option<String> {
        self.desired_stream()
    }

    fn close(&self) {
        ConnectionManager::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn manager(stream: Option<&str>) -> (ConnectionManager, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let mut config = ConnectionConfig::new("test", "ws://127.0.0.1:1/ws");
        config.initial_stream = stream.map(str::to_string);
        (ConnectionManager::new(config, tx), rx)
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0); // Infinite
        assert_eq!(config.keep_alive_window_ms, 600_000);
        assert_eq!(config.reconnect_delay_ms, 1000);
    }

    #[test]
    fn test_send_requires_open_state() {
        let (conn, _rx) = manager(None);
        let err = assert_err!(conn.send(ControlMethod::Subscribe, "btcusdt@trade"));
        assert!(matches!(err, WsError::NotConnected(name) if name == "test"));
    }

    #[tokio::test]
    async fn test_request_ids_are_monotonic() {
        let (conn, _rx) = manager(None);
        conn.set_state(ConnectionState::Open);

        assert_eq!(assert_ok!(conn.send(ControlMethod::Subscribe, "a@trade")), 0);
        assert_eq!(assert_ok!(conn.send(ControlMethod::Unsubscribe, "a@trade")), 1);

        // A refused send does not consume an id
        conn.set_state(ConnectionState::Reconnecting);
        assert_err!(conn.send(ControlMethod::Subscribe, "b@trade"));
        conn.set_state(ConnectionState::Open);
        assert_eq!(assert_ok!(conn.send(ControlMethod::Subscribe, "b@trade")), 2);

        let mut rx = conn.outbound_rx.lock().await;
        let first = rx.try_recv().unwrap();
        assert_eq!(
            first,
            r#"{"method":"SUBSCRIBE","params":["a@trade"],"id":0}"#
        );
    }

    #[test]
    fn test_subscribe_sets_desired_stream_while_down() {
        let (conn, _rx) = manager(Some("ethbtc@trade"));
        assert_eq!(conn.current_stream().as_deref(), Some("ethbtc@trade"));

        assert!(conn.subscribe("bnbbtc@trade").is_err());
        assert_eq!(conn.current_stream().as_deref(), Some("bnbbtc@trade"));

        // Unsubscribing another stream leaves the desired stream alone
        let _ = conn.unsubscribe("ethbtc@trade");
        assert_eq!(conn.current_stream().as_deref(), Some("bnbbtc@trade"));

        let _ = conn.unsubscribe("bnbbtc@trade");
        assert_eq!(conn.current_stream(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_never_reconnects() {
        let (conn, mut rx) = manager(Some("btcusdt@trade"));
        conn.close();
        conn.close();
        assert!(conn.is_closed());

        assert_ok!(conn.connect().await);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(rx.recv().await, Some(StreamEvent::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_attempts_are_bounded() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut config = ConnectionConfig::new("bounded", "ws://127.0.0.1:1/ws");
        config.reconnect_delay_ms = 10;
        config.max_reconnect_attempts = 2;
        let conn = ConnectionManager::new(config, tx);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, WsError::ConnectionFailed(_)));
        assert_eq!(rx.recv().await, Some(StreamEvent::Closed));
    }
}
