//! Frame parsing for the three consumed stream kinds.
//!
//! Converts wire payloads into domain types. Malformed frames are reported
//! as [`FeedError::Parse`] and counted; callers log and drop them.

use crate::error::{FeedError, FeedResult};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;
use volrank_core::{AssetBalance, Symbol, TradeTick, VolumeUpdate};
use volrank_ws::{MiniTickerPayload, TradePayload, UserDataPayload};

/// Counters of frames seen by the parser.
#[derive(Debug, Default)]
pub struct ParseStats {
    parsed: AtomicU64,
    malformed: AtomicU64,
}

impl ParseStats {
    fn record_parsed(&self) {
        self.parsed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parsed(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// User-data stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// Absolute balances of the listed assets.
    AccountPosition(Vec<(String, AssetBalance)>),
    /// Change of one asset's free balance.
    BalanceUpdate { asset: String, delta: Decimal },
    /// Order updates and other events that do not touch balances.
    Other,
}

/// Stateless frame parser with counters.
#[derive(Debug, Default)]
pub struct MessageParser {
    stats: ParseStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Parse a `!miniTicker@arr` frame into volume updates, in frame order.
    pub fn parse_mini_tickers(&self, text: &str) -> FeedResult<Vec<VolumeUpdate>> {
        self.counted(text, "mini-ticker array", |tickers: Vec<MiniTickerPayload>| {
            tickers
                .into_iter()
                .map(|t| -> FeedResult<VolumeUpdate> {
                    Ok(VolumeUpdate {
                        symbol: Symbol::parse(&t.symbol)?,
                        volume: t.volume,
                    })
                })
                .collect()
        })
    }

    /// Parse a `<symbol>@trade` frame.
    pub fn parse_trade(&self, text: &str) -> FeedResult<TradeTick> {
        self.counted(text, "trade", |trade: TradePayload| {
            Ok(TradeTick {
                symbol: Symbol::parse(&trade.symbol)?,
                event_time_ms: trade.event_time,
                trade_time_ms: trade.trade_time,
                trade_id: trade.trade_id,
            })
        })
    }

    /// Parse a user-data stream frame.
    pub fn parse_user_event(&self, text: &str) -> FeedResult<UserEvent> {
        self.counted(text, "user event", |payload: UserDataPayload| {
            Ok(match payload {
                UserDataPayload::AccountPosition { balances, .. } => UserEvent::AccountPosition(
                    balances
                        .into_iter()
                        .map(|b| (b.asset, AssetBalance::new(b.free, b.locked)))
                        .collect(),
                ),
                UserDataPayload::BalanceUpdate { asset, delta, .. } => {
                    UserEvent::BalanceUpdate { asset, delta }
                }
                UserDataPayload::Other => UserEvent::Other,
            })
        })
    }

    /// Decode `text` and convert it, counting the frame as parsed or
    /// malformed. A payload with an invalid symbol is malformed.
    fn counted<P, T>(
        &self,
        text: &str,
        kind: &str,
        convert: impl FnOnce(P) -> FeedResult<T>,
    ) -> FeedResult<T>
    where
        P: serde::de::DeserializeOwned,
    {
        let result = serde_json::from_str::<P>(text)
            .map_err(|e| FeedError::Parse(format!("Invalid {kind}: {e}")))
            .and_then(convert);
        match &result {
            Ok(_) => self.stats.record_parsed(),
            Err(_) => {
                self.stats.record_malformed();
                trace!(kind, raw = %text, "Malformed frame");
            }
        }
        result
    }
}
