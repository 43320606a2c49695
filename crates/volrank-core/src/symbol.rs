//! Trading pair identifiers.
//!
//! The exchange reports symbols in upper case (`BTCUSDT`) while every
//! stream name uses the lower-case form (`btcusdt@trade`). `Symbol` keeps
//! the canonical upper-case form and derives stream names from it.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the per-pair trade stream.
const TRADE_STREAM_SUFFIX: &str = "@trade";

/// Exchange trading pair symbol (e.g. `BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, normalizing to upper case.
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_ascii_uppercase())
    }

    /// Create a symbol from exchange input, rejecting empty or
    /// non-alphanumeric text.
    pub fn parse(symbol: &str) -> Result<Self> {
        let trimmed = symbol.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidSymbol(symbol.to_string()));
        }
        Ok(Self::new(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the trade stream for this pair (`btcusdt@trade`).
    pub fn trade_stream(&self) -> String {
        format!("{}{}", self.0.to_ascii_lowercase(), TRADE_STREAM_SUFFIX)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalizes_case() {
        let symbol = Symbol::new("btcusdt");
        assert_eq!(symbol.as_str(), "BTCUSDT");
        assert_eq!(symbol, Symbol::from("BTCUSDT"));
    }

    #[test]
    fn test_trade_stream_is_lowercase() {
        let symbol = Symbol::new("ETHBTC");
        assert_eq!(symbol.trade_stream(), "ethbtc@trade");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("BTC/USDT").is_err());
        assert_eq!(Symbol::parse(" bnbbtc ").unwrap().as_str(), "BNBBTC");
    }
}
