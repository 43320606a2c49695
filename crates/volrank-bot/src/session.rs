//! User-data session lifecycle.
//!
//! A session is a listen key plus the user-event stream opened on it. The
//! key is renewed on a fixed period; a renewal that keeps failing past the
//! retry budget hands the session back to the owner as expired.
//!
//! Restarts run in a background task so the owner keeps processing market
//! events. The task reports back with [`SessionEvent::Started`] or
//! [`SessionEvent::RestartFailed`], and the owner calls
//! [`SessionKeepAlive::attach`] with the new key.

use crate::config::{EndpointsConfig, SessionConfig, WsConfig};
use crate::error::AppResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use volrank_rest::ExchangeClient;
use volrank_telemetry::Metrics;
use volrank_ws::{ConnectionManager, StreamEvent, WsResult};

/// Time allowed for session tasks to finish after cancellation.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications from the session to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Renewal retries ran out; the token is presumed dead.
    Expired { listen_key: String },
    /// A background restart created a new listen key.
    Started { listen_key: String },
    /// A background restart could not create a listen key.
    RestartFailed { reason: String },
    /// A previously failed restart should be attempted again.
    RetryRestart,
}

/// Owns the listen key, its renewal task and the user-event connection.
pub struct SessionKeepAlive {
    client: ExchangeClient,
    config: SessionConfig,
    endpoints: EndpointsConfig,
    ws: WsConfig,
    event_tx: mpsc::Sender<StreamEvent>,
    session_tx: mpsc::Sender<SessionEvent>,
    listen_key: Option<String>,
    connection: Option<Arc<ConnectionManager>>,
    connection_task: Option<JoinHandle<WsResult<()>>>,
    renew_token: CancellationToken,
    renew_task: Option<JoinHandle<()>>,
    /// Pending restart; yields the key it created, if any.
    restart_task: Option<JoinHandle<Option<String>>>,
}

impl SessionKeepAlive {
    /// `client` must target the account API host and carry credentials.
    pub fn new(
        client: ExchangeClient,
        config: SessionConfig,
        endpoints: EndpointsConfig,
        ws: WsConfig,
        event_tx: mpsc::Sender<StreamEvent>,
        session_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            client,
            config,
            endpoints,
            ws,
            event_tx,
            session_tx,
            listen_key: None,
            connection: None,
            connection_task: None,
            renew_token: CancellationToken::new(),
            renew_task: None,
            restart_task: None,
        }
    }

    pub fn listen_key(&self) -> Option<&str> {
        self.listen_key.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.listen_key.is_some()
    }

    pub fn is_restarting(&self) -> bool {
        self.restart_task.is_some()
    }

    pub fn connection(&self) -> Option<&Arc<ConnectionManager>> {
        self.connection.as_ref()
    }

    /// Create a listen key, open its user-event stream and start renewing it.
    pub async fn start(&mut self) -> AppResult<()> {
        self.renew_token = CancellationToken::new();
        let listen_key = self.client.create_listen_key().await?;
        info!("User data session created");
        self.attach(listen_key);
        Ok(())
    }

    /// Open the user-event stream on `listen_key` and start renewing it.
    pub fn attach(&mut self, listen_key: String) {
        self.restart_task = None;
        if self.listen_key.is_some() {
            warn!("Session already attached, ignoring new listen key");
            return;
        }

        let url = self.endpoints.user_stream_url(&listen_key);
        let conn = Arc::new(ConnectionManager::new(
            self.ws.connection_config("user", url, None),
            self.event_tx.clone(),
        ));
        self.connection_task = Some(conn.spawn());
        self.connection = Some(conn);

        self.renew_task = Some(tokio::spawn(renew_loop(
            self.client.clone(),
            self.config.clone(),
            listen_key.clone(),
            self.session_tx.clone(),
            self.renew_token.clone(),
        )));
        self.listen_key = Some(listen_key);
    }

    /// Stop renewing, close the user-event stream, then delete the key.
    /// Deletion is best effort.
    pub async fn stop(&mut self) {
        self.renew_token.cancel();
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        if let Some(task) = self.connection_task.take() {
            if timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!("User stream did not stop in time");
            }
        }

        if let Some(listen_key) = self.listen_key.take() {
            delete_listen_key(&self.client, &listen_key).await;
        }

        // A restart still in flight may have created a key nobody attached.
        if let Some(task) = self.restart_task.take() {
            match timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(Some(listen_key))) => delete_listen_key(&self.client, &listen_key).await,
                Ok(_) => {}
                Err(_) => warn!("Session restart did not finish in time"),
            }
        }

        if let Some(task) = self.renew_task.take() {
            let _ = timeout(STOP_TIMEOUT, task).await;
        }
    }

    /// Tear down the current session and create a new one in the
    /// background. Returns immediately.
    pub fn begin_restart(&mut self) {
        if self.restart_task.is_some() {
            debug!("Session restart already in progress");
            return;
        }
        warn!("Restarting user data session");
        Metrics::session_restarted();

        self.renew_token.cancel();
        self.renew_token = CancellationToken::new();
        if let Some(conn) = self.connection.take() {
            conn.close();
        }

        let client = self.client.clone();
        let session_tx = self.session_tx.clone();
        let old_key = self.listen_key.take();
        let connection_task = self.connection_task.take();
        let renew_task = self.renew_task.take();

        self.restart_task = Some(tokio::spawn(async move {
            if let Some(task) = connection_task {
                let _ = timeout(STOP_TIMEOUT, task).await;
            }
            if let Some(listen_key) = old_key {
                delete_listen_key(&client, &listen_key).await;
            }
            if let Some(task) = renew_task {
                let _ = timeout(STOP_TIMEOUT, task).await;
            }

            match client.create_listen_key().await {
                Ok(listen_key) => {
                    info!("User data session created");
                    let event = SessionEvent::Started {
                        listen_key: listen_key.clone(),
                    };
                    let _ = session_tx.send(event).await;
                    Some(listen_key)
                }
                Err(e) => {
                    let event = SessionEvent::RestartFailed {
                        reason: e.to_string(),
                    };
                    let _ = session_tx.send(event).await;
                    None
                }
            }
        }));
    }

    /// Ask the owner to retry a failed restart after `delay`.
    pub fn retry_later(&mut self, delay: Duration) {
        self.restart_task = None;
        let session_tx = self.session_tx.clone();
        let cancel = self.renew_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = session_tx.send(SessionEvent::RetryRestart).await;
                }
            }
        });
    }

    /// Delay before retrying a failed restart.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_max_delay_ms)
    }
}

async fn delete_listen_key(client: &ExchangeClient, listen_key: &str) {
    match client.close_listen_key(listen_key).await {
        Ok(()) => info!("User data session closed"),
        Err(e) => debug!(error = %e, "Session delete failed"),
    }
}

async fn renew_loop(
    client: ExchangeClient,
    config: SessionConfig,
    listen_key: String,
    session_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let period = config.renew_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if !renew_with_retry(&client, &config, &listen_key, &cancel).await {
            if cancel.is_cancelled() {
                return;
            }
            error!(
                attempts = config.max_renew_attempts,
                "Session renewal failed, session expired"
            );
            let _ = session_tx.send(SessionEvent::Expired { listen_key }).await;
            return;
        }
    }
}

/// Returns whether the key was renewed before the attempts ran out.
async fn renew_with_retry(
    client: &ExchangeClient,
    config: &SessionConfig,
    listen_key: &str,
    cancel: &CancellationToken,
) -> bool {
    for attempt in 1..=config.max_renew_attempts {
        match client.renew_listen_key(listen_key).await {
            Ok(()) => {
                debug!(attempt, "Session renewed");
                return true;
            }
            Err(e) => {
                Metrics::session_renew_failed();
                if attempt == config.max_renew_attempts {
                    warn!(attempt, error = %e, "Session renewal failed");
                    break;
                }
                let delay = config.retry_delay(attempt);
                warn!(
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Session renewal failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    false
}
