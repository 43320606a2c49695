//! Domain types shared across crates.

use crate::symbol::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A trading pair with its trailing 24h volume and current rank.
///
/// Rank 0 is the highest volume. Ranks are only consistent with volumes
/// right after a recomputation; volume updates mutate `volume` in place
/// without re-ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: Symbol,
    pub volume: f64,
    pub rank: usize,
}

impl TradingPair {
    pub fn new(symbol: Symbol, volume: f64) -> Self {
        Self {
            symbol,
            volume,
            rank: 0,
        }
    }
}

/// Trailing volume reported for one symbol by the aggregate ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeUpdate {
    pub symbol: Symbol,
    pub volume: f64,
}

/// A single trade as seen on a per-pair trade stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeTick {
    pub symbol: Symbol,
    /// Exchange event time (ms since epoch).
    pub event_time_ms: i64,
    /// Trade execution time (ms since epoch).
    pub trade_time_ms: i64,
    pub trade_id: u64,
}

impl TradeTick {
    /// Transit time from exchange event to local receipt.
    ///
    /// Negative when the local clock is behind the exchange clock.
    pub fn latency_ms(&self, received_at_ms: i64) -> i64 {
        received_at_ms - self.event_time_ms
    }
}

/// Free and locked amounts of a single account asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn new(free: Decimal, locked: Decimal) -> Self {
        Self { free, locked }
    }

    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }

    pub fn is_zero(&self) -> bool {
        self.total().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_balance_total() {
        let balance = AssetBalance::new(dec!(1.5), dec!(0.25));
        assert_eq!(balance.total(), dec!(1.75));
        assert!(!balance.is_zero());
        assert!(AssetBalance::default().is_zero());
    }

    #[test]
    fn test_trade_latency_can_be_negative() {
        let tick = TradeTick {
            symbol: Symbol::new("BTCUSDT"),
            event_time_ms: 1_000,
            trade_time_ms: 999,
            trade_id: 1,
        };
        assert_eq!(tick.latency_ms(1_042), 42);
        assert_eq!(tick.latency_ms(990), -10);
    }
}
