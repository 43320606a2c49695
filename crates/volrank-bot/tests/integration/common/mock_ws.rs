//! Mock stream server for integration tests.
//!
//! Speaks just enough of the exchange stream protocol:
//! - acknowledges SUBSCRIBE/UNSUBSCRIBE control frames
//! - pushes scripted frames after a SUBSCRIBE for a given stream
//! - records every text frame received
//! - records when each connection closed, labelled by its first
//!   subscribed stream or, failing that, its request path
//! - stays silent otherwise, so short keep-alive windows expire

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

type Script = Arc<HashMap<String, Vec<String>>>;
type Closes = Arc<Mutex<Vec<(String, Instant)>>>;

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    push_tx: broadcast::Sender<String>,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    closes: Closes,
}

impl MockWsServer {
    /// Start a server with no scripted frames.
    pub async fn start() -> Self {
        Self::with_script(HashMap::new()).await
    }

    /// Start a server that answers a SUBSCRIBE for each key with its frames.
    pub async fn with_script(script: HashMap<String, Vec<String>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let closes: Closes = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (push_tx, _) = broadcast::channel(64);
        let script: Script = Arc::new(script);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let closes_clone = closes.clone();
        let push_clone = push_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            messages_clone.clone(),
                            connections_clone.clone(),
                            closes_clone.clone(),
                            script.clone(),
                            push_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            push_tx,
            messages,
            connections,
            closes,
        }
    }

    /// Base URL, as configured for a WebSocket host.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Bare stream endpoint.
    pub fn stream_url(&self) -> String {
        format!("{}/ws", self.url())
    }

    /// Number of accepted transports.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Every text frame received so far, across connections.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    /// Control frames received for `stream` with the given method.
    pub async fn control_frames(&self, method: &str, stream: &str) -> Vec<serde_json::Value> {
        self.received_messages()
            .await
            .iter()
            .filter_map(|m| serde_json::from_str::<serde_json::Value>(m).ok())
            .filter(|v| {
                v["method"] == method && v["params"].get(0).and_then(|p| p.as_str()) == Some(stream)
            })
            .collect()
    }

    /// Closed connections in close order, with the time each close was seen.
    pub async fn closed_connections(&self) -> Vec<(String, Instant)> {
        self.closes.lock().await.clone()
    }

    /// When the connection labelled `label` closed, if it has.
    pub async fn closed_at(&self, label: &str) -> Option<Instant> {
        self.closes
            .lock()
            .await
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, at)| *at)
    }

    /// Send `frame` to every open connection.
    pub fn push_all(&self, frame: impl Into<String>) {
        let _ = self.push_tx.send(frame.into());
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    closes: Closes,
    script: Script,
    mut push_rx: broadcast::Receiver<String>,
) {
    *connections.lock().await += 1;

    let mut label = String::new();
    let record_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        label = req.uri().path().to_string();
        Ok(resp)
    };
    let ws_stream = match accept_hdr_async(stream, record_path).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let mut subscribed = false;

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !subscribed {
                        if let Some(stream) = first_subscribed_stream(&text) {
                            label = stream;
                            subscribed = true;
                        }
                    }
                    messages.lock().await.push(text.clone());
                    let mut failed = false;
                    for reply in replies(&text, &script) {
                        if write.send(Message::Text(reply)).await.is_err() {
                            failed = true;
                            break;
                        }
                    }
                    if failed {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            Ok(frame) = push_rx.recv() => {
                if write.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    closes.lock().await.push((label, Instant::now()));
}

fn first_subscribed_stream(text: &str) -> Option<String> {
    let frame: serde_json::Value = serde_json::from_str(text).ok()?;
    if frame["method"] != "SUBSCRIBE" {
        return None;
    }
    frame["params"].get(0)?.as_str().map(str::to_string)
}

/// Ack for a control frame, followed by any scripted frames.
fn replies(text: &str, script: &HashMap<String, Vec<String>>) -> Vec<String> {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };
    let Some(id) = frame.get("id") else {
        return Vec::new();
    };

    let mut out = vec![serde_json::json!({ "result": null, "id": id }).to_string()];
    if frame["method"] == "SUBSCRIBE" {
        if let Some(stream) = frame["params"].get(0).and_then(|p| p.as_str()) {
            if let Some(frames) = script.get(stream) {
                out.extend(frames.iter().cloned());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        assert!(server.stream_url().ends_with("/ws"));
        server.shutdown().await;
    }

    #[test]
    fn test_replies_ack_then_script() {
        let mut script = HashMap::new();
        script.insert("a@trade".to_string(), vec!["{\"x\":1}".to_string()]);

        let out = replies(r#"{"method":"SUBSCRIBE","params":["a@trade"],"id":4}"#, &script);
        assert_eq!(out, vec![r#"{"result":null,"id":4}"#, r#"{"x":1}"#]);

        let out = replies(r#"{"method":"UNSUBSCRIBE","params":["a@trade"],"id":5}"#, &script);
        assert_eq!(out.len(), 1);
        assert!(replies("not json", &script).is_empty());
    }

    #[test]
    fn test_first_subscribed_stream() {
        assert_eq!(
            first_subscribed_stream(r#"{"method":"SUBSCRIBE","params":["a@trade"],"id":0}"#),
            Some("a@trade".to_string())
        );
        assert_eq!(
            first_subscribed_stream(r#"{"method":"UNSUBSCRIBE","params":["a@trade"],"id":1}"#),
            None
        );
    }
}
