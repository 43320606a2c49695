//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use volrank_ws::ConnectionConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "VOLRANK_CONFIG";

/// Config file used when neither the CLI nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoints: EndpointsConfig,
    pub ranking: RankingConfig,
    pub websocket: WsConfig,
    pub session: SessionConfig,
    pub latency: LatencyConfig,
    pub telemetry: TelemetryConfig,
    pub credentials: CredentialsConfig,
}

/// REST and WebSocket hosts.
///
/// Account and user-data traffic goes to one host pair, public market
/// data to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_account_api_url")]
    pub account_api_url: String,
    #[serde(default = "default_account_ws_url")]
    pub account_ws_url: String,
    #[serde(default = "default_market_api_url")]
    pub market_api_url: String,
    #[serde(default = "default_market_ws_url")]
    pub market_ws_url: String,
}

fn default_account_api_url() -> String {
    "https://testnet.binance.vision".to_string()
}

fn default_account_ws_url() -> String {
    "wss://testnet.binance.vision".to_string()
}

fn default_market_api_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_market_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            account_api_url: default_account_api_url(),
            account_ws_url: default_account_ws_url(),
            market_api_url: default_market_api_url(),
            market_ws_url: default_market_ws_url(),
        }
    }
}

impl EndpointsConfig {
    /// Bare stream endpoint for market data; streams are chosen by
    /// SUBSCRIBE frames.
    pub fn market_stream_url(&self) -> String {
        format!("{}/ws", self.market_ws_url.trim_end_matches('/'))
    }

    /// User-data stream endpoint for a session token.
    pub fn user_stream_url(&self, listen_key: &str) -> String {
        format!(
            "{}/ws/{listen_key}",
            self.account_ws_url.trim_end_matches('/')
        )
    }
}

/// Ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Number of live trade subscriptions.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_top_n() -> usize {
    10
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
        }
    }
}

/// WebSocket configuration shared by every stream connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Inbound silence tolerated before reconnecting (ms).
    #[serde(default = "default_keep_alive_window_ms")]
    pub keep_alive_window_ms: u64,
    /// Fixed delay before a reconnect (ms).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Maximum consecutive failed connection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_keep_alive_window_ms() -> u64 {
    600_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            keep_alive_window_ms: default_keep_alive_window_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
        }
    }
}

impl WsConfig {
    /// Connection settings for one stream.
    pub fn connection_config(
        &self,
        name: impl Into<String>,
        url: impl Into<String>,
        stream: Option<String>,
    ) -> ConnectionConfig {
        ConnectionConfig {
            name: name.into(),
            url: url.into(),
            initial_stream: stream,
            keep_alive_window_ms: self.keep_alive_window_ms,
            reconnect_delay_ms: self.reconnect_delay_ms,
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

/// Session (listen key) lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Renewal period (ms). Default: 30 minutes.
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,
    /// Server-side validity of a token without renewal (ms). Default: 60 minutes.
    #[serde(default = "default_validity_window_ms")]
    pub validity_window_ms: u64,
    /// First retry delay after a failed renewal (ms). Default: 60 seconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cap on the doubling retry delay (ms). Default: 4 minutes.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Consecutive failed renewals before the session is restarted.
    #[serde(default = "default_max_renew_attempts")]
    pub max_renew_attempts: u32,
}

fn default_renew_interval_ms() -> u64 {
    30 * 60 * 1_000
}

fn default_validity_window_ms() -> u64 {
    60 * 60 * 1_000
}

fn default_retry_base_delay_ms() -> u64 {
    60_000
}

fn default_retry_max_delay_ms() -> u64 {
    240_000
}

fn default_max_renew_attempts() -> u32 {
    6
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renew_interval_ms: default_renew_interval_ms(),
            validity_window_ms: default_validity_window_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_renew_attempts: default_max_renew_attempts(),
        }
    }
}

impl SessionConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    /// Delay after the `attempt`-th consecutive failure (1-based):
    /// base * 2^(attempt-1), capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Longest time spent retrying one renewal before giving up.
    pub fn worst_case_retry(&self) -> Duration {
        (1..self.max_renew_attempts)
            .map(|attempt| self.retry_delay(attempt))
            .sum()
    }

    /// The token must be renewed, retries included, before it lapses.
    pub fn validate(&self) -> AppResult<()> {
        if self.renew_interval_ms == 0 {
            return Err(AppError::Config(
                "session.renew_interval_ms must be positive".to_string(),
            ));
        }
        if self.renew_interval_ms >= self.validity_window_ms {
            return Err(AppError::Config(format!(
                "session.renew_interval_ms ({}) must be shorter than validity_window_ms ({})",
                self.renew_interval_ms, self.validity_window_ms
            )));
        }
        if self.max_renew_attempts == 0 {
            return Err(AppError::Config(
                "session.max_renew_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(AppError::Config(
                "session.retry_base_delay_ms exceeds retry_max_delay_ms".to_string(),
            ));
        }

        let deadline = self.renew_interval() + self.worst_case_retry();
        if deadline >= Duration::from_millis(self.validity_window_ms) {
            return Err(AppError::Config(format!(
                "session renewal retries can run until {}ms, past the {}ms validity window",
                deadline.as_millis(),
                self.validity_window_ms
            )));
        }
        Ok(())
    }
}

/// Latency reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

fn default_report_interval_ms() -> u64 {
    60_000
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Names of the environment variables holding the API key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub api_key_env: String,
    pub api_secret_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_key_env: "VOLRANK_API_KEY".to_string(),
            api_secret_env: "VOLRANK_API_SECRET".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration: explicit path, then `VOLRANK_CONFIG`, then the
    /// default file. Only a missing default file falls back to built-in
    /// defaults.
    pub fn load(explicit_path: Option<String>) -> AppResult<Self> {
        let config = match explicit_path.or_else(|| std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            None => {
                tracing::warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.ranking.top_n == 0 {
            return Err(AppError::Config("ranking.top_n must be at least 1".to_string()));
        }
        if self.websocket.keep_alive_window_ms == 0 {
            return Err(AppError::Config(
                "websocket.keep_alive_window_ms must be positive".to_string(),
            ));
        }
        if self.latency.report_interval_ms == 0 {
            return Err(AppError::Config(
                "latency.report_interval_ms must be positive".to_string(),
            ));
        }
        self.session.validate()
    }
}
