//! WebSocket stream connections for volrank.
//!
//! Each [`ConnectionManager`] owns one logical stream connection:
//! - Liveness deadline reset by every inbound frame
//! - Fixed-delay reconnect once the deadline lapses
//! - Explicit re-subscription of the desired stream on every open
//! - Typed events delivered to the owner over an mpsc channel

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;

pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, StreamControl, StreamEvent,
};
pub use error::{WsError, WsResult};
pub use heartbeat::LivenessDeadline;
pub use message::{
    parse_control_response, BalanceEntry, ControlFrame, ControlMethod, ControlResponse,
    MiniTickerPayload, TradePayload, UserDataPayload,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install ring as the process-wide rustls provider used by `wss://`
/// stream connections. Must be called before any connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
