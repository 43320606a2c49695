//! Binance volume-rank market data client.
//!
//! Tracks the top-N pairs by 24h volume, keeps one trade stream per ranked
//! pair, measures trade latency and follows account balances over a
//! user-data session.

pub mod app;
pub mod config;
pub mod error;
pub mod router;
pub mod session;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use router::SubscriptionRouter;
pub use session::{SessionEvent, SessionKeepAlive};
