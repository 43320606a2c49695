//! Main application orchestration.
//!
//! Coordinates all components:
//! - Account balances and the user-data session
//! - Volume ranking from the 24h snapshot and the mini-ticker stream
//! - One trade connection per top-N symbol, migrated as the ranking moves
//! - Trade latency reporting

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::router::SubscriptionRouter;
use crate::session::{SessionEvent, SessionKeepAlive};
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use volrank_core::{AssetBalance, Symbol, VolumeUpdate};
use volrank_feed::{BalanceBook, MessageParser, RankTracker};
use volrank_rest::{Credentials, ExchangeClient, RequestSigner};
use volrank_telemetry::{LatencyMonitor, Metrics};
use volrank_ws::{ConnectionManager, StreamEvent, WsResult};

/// Aggregate stream carrying every pair's rolling volume.
pub const MINI_TICKER_STREAM: &str = "!miniTicker@arr";

/// Capacity of each inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Time allowed for connection tasks to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiving ends of the event channels, moved into the event loop.
struct EventStreams {
    ticker_rx: mpsc::Receiver<StreamEvent>,
    trade_rx: mpsc::Receiver<StreamEvent>,
    user_rx: mpsc::Receiver<StreamEvent>,
    session_rx: mpsc::Receiver<SessionEvent>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    market_client: ExchangeClient,
    account_client: ExchangeClient,
    parser: MessageParser,
    tracker: RankTracker,
    router: SubscriptionRouter<ConnectionManager>,
    balances: BalanceBook,
    latency: LatencyMonitor,
    session: SessionKeepAlive,
    ticker: Option<Arc<ConnectionManager>>,
    ticker_tx: mpsc::Sender<StreamEvent>,
    trade_tx: mpsc::Sender<StreamEvent>,
    streams: Option<EventStreams>,
    tasks: Vec<JoinHandle<WsResult<()>>>,
}

impl Application {
    /// Create a new application. Nothing is connected until [`run`](Self::run).
    pub fn new(config: AppConfig, credentials: Credentials) -> AppResult<Self> {
        let market_client =
            ExchangeClient::new(RequestSigner::public_only(&config.endpoints.market_api_url))?;
        let account_client = ExchangeClient::new(RequestSigner::new(
            &config.endpoints.account_api_url,
            credentials,
        ))?;

        let (ticker_tx, ticker_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (trade_tx, trade_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (user_tx, user_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (session_tx, session_rx) = mpsc::channel(8);

        let session = SessionKeepAlive::new(
            account_client.clone(),
            config.session.clone(),
            config.endpoints.clone(),
            config.websocket.clone(),
            user_tx,
            session_tx,
        );

        Ok(Self {
            tracker: RankTracker::new(config.ranking.top_n),
            config,
            market_client,
            account_client,
            parser: MessageParser::new(),
            router: SubscriptionRouter::new(),
            balances: BalanceBook::new(),
            latency: LatencyMonitor::new(),
            session,
            ticker: None,
            ticker_tx,
            trade_tx,
            streams: Some(EventStreams {
                ticker_rx,
                trade_rx,
                user_rx,
                session_rx,
            }),
            tasks: Vec::new(),
        })
    }

    /// Run until Ctrl-C or SIGTERM.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> AppResult<()> {
        let EventStreams {
            mut ticker_rx,
            mut trade_rx,
            mut user_rx,
            mut session_rx,
        } = self
            .streams
            .take()
            .ok_or_else(|| AppError::Startup("event streams already consumed".to_string()))?;

        info!(top_n = self.config.ranking.top_n, "Starting application");
        if let Err(e) = self.start().await {
            error!(error = %e, "Startup failed");
            self.shutdown().await;
            return Err(e);
        }

        let report_interval = Duration::from_millis(self.config.latency.report_interval_ms);
        let mut report_timer = interval_at(Instant::now() + report_interval, report_interval);

        info!("Entering main event loop");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(event) = ticker_rx.recv() => self.on_ticker_event(event),

                Some(event) = trade_rx.recv() => self.on_trade_event(event),

                Some(event) = user_rx.recv() => self.on_user_event(event),

                Some(event) = session_rx.recv() => self.on_session_event(event),

                _ = report_timer.tick() => {
                    self.latency.flush_stats();
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Balances, session, snapshot, trade streams, then the ticker stream.
    async fn start(&mut self) -> AppResult<()> {
        match self.load_balances().await {
            Ok(()) => self.log_balances(),
            Err(e) => warn!(error = %e, "Failed to fetch account balances"),
        }

        self.session
            .start()
            .await
            .map_err(|e| AppError::Startup(format!("user data session: {e}")))?;

        let tickers = self
            .market_client
            .ticker_24hr()
            .await
            .map_err(|e| AppError::Startup(format!("24h ticker snapshot: {e}")))?;
        let snapshot = tickers
            .into_iter()
            .filter_map(|t| match Symbol::parse(&t.symbol) {
                Ok(symbol) => Some(VolumeUpdate {
                    symbol,
                    volume: t.volume,
                }),
                Err(e) => {
                    warn!(error = %e, "Skipping snapshot entry");
                    None
                }
            });
        let top = self.tracker.initialize(snapshot)?;
        Metrics::tracked_pairs(self.tracker.len());
        info!(
            pairs = self.tracker.len(),
            top = ?top.iter().map(Symbol::as_str).collect::<Vec<_>>(),
            "Volume ranking initialized"
        );

        let (config, trade_tx, tasks) = (&self.config, &self.trade_tx, &mut self.tasks);
        self.router.open(&top, |symbol| {
            open_trade_connection(config, trade_tx, tasks, symbol)
        });

        let market_url = self.config.endpoints.market_stream_url();
        let ws = &self.config.websocket;
        let ticker = Arc::new(ConnectionManager::new(
            ws.connection_config("ticker", market_url, Some(MINI_TICKER_STREAM.to_string())),
            self.ticker_tx.clone(),
        ));
        self.tasks.push(ticker.spawn());
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn load_balances(&mut self) -> AppResult<()> {
        let account = self.account_client.account().await?;
        self.balances.seed(
            account
                .balances
                .into_iter()
                .map(|b| (b.asset, AssetBalance::new(b.free, b.locked))),
        );
        Ok(())
    }

    fn log_balances(&self) {
        for (asset, balance) in self.balances.non_zero() {
            info!(
                asset,
                free = %balance.free,
                locked = %balance.locked,
                "Balance"
            );
        }
    }

    /// Apply one aggregate-ticker frame, then reconcile the trade streams.
    fn on_ticker_event(&mut self, event: StreamEvent) {
        let Some(text) = observe("ticker", event) else {
            return;
        };

        let updates = match self.parser.parse_mini_tickers(&text) {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Dropping malformed ticker frame");
                Metrics::malformed_frame("ticker");
                return;
            }
        };

        for update in &updates {
            if let Err(e) = self.tracker.apply_volume_update(update) {
                warn!(error = %e, "Volume update rejected");
            }
        }

        let diff = self.tracker.recompute_top_n();
        Metrics::tracked_pairs(self.tracker.len());
        if diff.is_empty() {
            return;
        }

        info!(
            unsubscribe = ?diff.to_unsubscribe.iter().map(Symbol::as_str).collect::<Vec<_>>(),
            subscribe = ?diff.to_subscribe.iter().map(Symbol::as_str).collect::<Vec<_>>(),
            "Top-N changed"
        );
        let (config, trade_tx, tasks) = (&self.config, &self.trade_tx, &mut self.tasks);
        let migrated = self.router.reconcile(&diff, |symbol| {
            open_trade_connection(config, trade_tx, tasks, symbol)
        });
        Metrics::rank_swaps(migrated);
    }

    fn on_trade_event(&mut self, event: StreamEvent) {
        let (text, received_at_ms) = match event {
            StreamEvent::Message {
                text,
                received_at_ms,
            } => (text, received_at_ms),
            other => {
                observe("trade", other);
                return;
            }
        };
        Metrics::ws_message("trade");

        match self.parser.parse_trade(&text) {
            Ok(tick) => {
                let latency = self.latency.record_sample(tick.event_time_ms, received_at_ms);
                Metrics::trade_latency(latency);
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed trade frame");
                Metrics::malformed_frame("trade");
            }
        }
    }

    fn on_user_event(&mut self, event: StreamEvent) {
        let Some(text) = observe("user", event) else {
            return;
        };

        match self.parser.parse_user_event(&text) {
            Ok(user_event) => {
                if self.balances.apply(&user_event) {
                    self.log_balances();
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed user event");
                Metrics::malformed_frame("user");
            }
        }
    }

    /// Session changes only swap handles; the REST calls of a restart run
    /// in the session's own task.
    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Expired { .. } => {
                warn!("User data session expired");
                self.session.begin_restart();
            }
            SessionEvent::RetryRestart => self.session.begin_restart(),
            SessionEvent::Started { listen_key } => {
                self.session.attach(listen_key);
                info!("User data session restarted");
            }
            SessionEvent::RestartFailed { reason } => {
                let delay = self.session.restart_delay();
                error!(
                    error = %reason,
                    retry_in_ms = delay.as_millis() as u64,
                    "Session restart failed"
                );
                self.session.retry_later(delay);
            }
        }
    }

    /// Close the user stream and session token, then the market streams.
    async fn shutdown(&mut self) {
        info!("Shutting down");
        self.session.stop().await;

        if let Some(ticker) = self.ticker.take() {
            ticker.close();
        }
        self.router.close_all();

        let tasks: Vec<_> = self.tasks.drain(..).collect();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(tasks))
            .await
            .is_err()
        {
            warn!("Connections did not close in time");
        }

        self.latency.flush_stats();
        let stats = self.parser.stats();
        info!(
            parsed = stats.parsed(),
            malformed = stats.malformed(),
            "Shutdown complete"
        );
    }
}

/// Create and spawn the trade connection for `symbol`.
fn open_trade_connection(
    config: &AppConfig,
    trade_tx: &mpsc::Sender<StreamEvent>,
    tasks: &mut Vec<JoinHandle<WsResult<()>>>,
    symbol: &Symbol,
) -> Arc<ConnectionManager> {
    let conn = Arc::new(ConnectionManager::new(
        config.websocket.connection_config(
            format!("trade-{}", symbol.as_str().to_lowercase()),
            config.endpoints.market_stream_url(),
            Some(symbol.trade_stream()),
        ),
        trade_tx.clone(),
    ));
    tasks.push(conn.spawn());
    conn
}

/// Record connection lifecycle metrics and return the text of data frames.
fn observe(stream: &str, event: StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Message { text, .. } => {
            Metrics::ws_message(stream);
            Some(text)
        }
        StreamEvent::Opened => {
            Metrics::ws_opened(stream);
            None
        }
        StreamEvent::TimedOut => {
            Metrics::ws_reconnect(stream);
            None
        }
        StreamEvent::Closed => {
            debug!(stream, "Stream closed");
            None
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
