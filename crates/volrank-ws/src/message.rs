//! WebSocket message types.
//!
//! Outgoing control frames plus the inbound payloads of the three stream
//! kinds the client consumes: the aggregate mini-ticker array, per-pair
//! trades and user-data events.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Control frames (Outgoing)
// ============================================================================

/// Control frame method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMethod {
    Subscribe,
    Unsubscribe,
}

impl std::fmt::Display for ControlMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribe => write!(f, "SUBSCRIBE"),
            Self::Unsubscribe => write!(f, "UNSUBSCRIBE"),
        }
    }
}

/// Subscribe/unsubscribe request sent on a stream connection.
///
/// Wire format: `{"method":"SUBSCRIBE","params":["btcusdt@trade"],"id":0}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame {
    pub method: ControlMethod,
    pub params: Vec<String>,
    /// Per-connection request id, echoed back in the acknowledgement.
    pub id: u64,
}

impl ControlFrame {
    pub fn new(method: ControlMethod, stream: impl Into<String>, id: u64) -> Self {
        Self {
            method,
            params: vec![stream.into()],
            id,
        }
    }

    pub fn subscribe(stream: impl Into<String>, id: u64) -> Self {
        Self::new(ControlMethod::Subscribe, stream, id)
    }

    pub fn unsubscribe(stream: impl Into<String>, id: u64) -> Self {
        Self::new(ControlMethod::Unsubscribe, stream, id)
    }
}

// ============================================================================
// Control acknowledgements (Incoming)
// ============================================================================

/// Acknowledgement of a control frame.
///
/// Success: `{"result":null,"id":3}`.
/// Failure: `{"error":{"code":2,"msg":"Invalid request"},"id":3}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ControlError>,
}

impl ControlResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Error body of a rejected control frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlError {
    pub code: i64,
    pub msg: String,
}

/// Try to interpret a text frame as a control acknowledgement.
///
/// Data frames never carry a top-level `id`, so they fail here cheaply.
pub fn parse_control_response(text: &str) -> Option<ControlResponse> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str(text).ok()
}

// ============================================================================
// Market data payloads (Incoming)
// ============================================================================

/// One element of the `!miniTicker@arr` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct MiniTickerPayload {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    /// Close price.
    #[serde(rename = "c", default, deserialize_with = "opt_f64_from_str")]
    pub close: Option<f64>,
    /// Total traded base asset volume (trailing 24h).
    #[serde(rename = "v", deserialize_with = "f64_from_str")]
    pub volume: f64,
    /// Total traded quote asset volume (trailing 24h).
    #[serde(rename = "q", default, deserialize_with = "opt_f64_from_str")]
    pub quote_volume: Option<f64>,
}

/// A `<symbol>@trade` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct TradePayload {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Whether the buyer is the market maker.
    #[serde(rename = "m", default)]
    pub buyer_is_maker: bool,
}

// ============================================================================
// User data payloads (Incoming)
// ============================================================================

/// User-data stream event, discriminated by the `e` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum UserDataPayload {
    /// Full balances of every asset touched by an account update.
    #[serde(rename = "outboundAccountPosition")]
    AccountPosition {
        #[serde(rename = "E")]
        event_time: i64,
        #[serde(rename = "B")]
        balances: Vec<BalanceEntry>,
    },
    /// Deposit, withdrawal or transfer delta for one asset.
    #[serde(rename = "balanceUpdate")]
    BalanceUpdate {
        #[serde(rename = "E")]
        event_time: i64,
        #[serde(rename = "a")]
        asset: String,
        #[serde(rename = "d", with = "rust_decimal::serde::str")]
        delta: Decimal,
    },
    /// Order updates and anything else the client does not track.
    #[serde(other)]
    Other,
}

/// Balance entry inside `outboundAccountPosition`.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEntry {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f", with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

// The exchange encodes numbers as JSON strings.
fn f64_from_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<f64>().map_err(serde::de::Error::custom)
}

fn opt_f64_from_str<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|s| s.parse::<f64>().map_err(serde::de::Error::custom))
        .transpose()
}
