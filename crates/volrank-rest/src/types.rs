//! REST response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

/// `GET /api/v3/account` response (fields the client uses).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub update_time: i64,
    pub balances: Vec<AccountBalance>,
}

/// One asset of the account snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

/// One entry of the `GET /api/v3/ticker/24hr` snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hr {
    pub symbol: String,
    /// Base asset volume over the trailing 24h.
    #[serde(deserialize_with = "f64_from_str")]
    pub volume: f64,
    #[serde(default, deserialize_with = "opt_f64_from_str")]
    pub quote_volume: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64_from_str")]
    pub last_price: Option<f64>,
}

/// `POST /api/v3/userDataStream` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKeyResponse {
    pub listen_key: String,
}

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
