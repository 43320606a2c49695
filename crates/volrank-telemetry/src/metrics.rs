//! Prometheus metrics for volrank.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration
//! failure means duplicate metric names, a programming error that should
//! crash at first use rather than silently drop data.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, register_int_gauge,
    CounterVec, Encoder, Histogram, IntCounter, IntGauge, TextEncoder,
};

/// Transports opened, per stream kind (ticker/trade/user).
pub static WS_OPENED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "volrank_ws_opened_total",
        "WebSocket transports opened",
        &["stream"]
    )
    .unwrap()
});

/// Keep-alive timeouts (each one schedules a reconnect).
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "volrank_ws_reconnect_total",
        "WebSocket reconnects after keep-alive timeout",
        &["stream"]
    )
    .unwrap()
});

/// Data frames received.
pub static WS_MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "volrank_ws_messages_total",
        "WebSocket data frames received",
        &["stream"]
    )
    .unwrap()
});

/// Frames dropped because they failed to parse.
pub static MALFORMED_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "volrank_malformed_frames_total",
        "Frames dropped as malformed",
        &["stream"]
    )
    .unwrap()
});

/// Exchange-event to local-receipt latency of trade frames.
pub static TRADE_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "volrank_trade_latency_ms",
        "Trade frame latency (receipt time minus event time) in milliseconds",
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Connections migrated from one symbol to another.
pub static RANK_SWAPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "volrank_rank_swaps_total",
        "Trade connections migrated to a new top-N symbol"
    )
    .unwrap()
});

/// Known trading pairs.
pub static TRACKED_PAIRS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("volrank_tracked_pairs", "Trading pairs known to the ranking").unwrap()
});

/// Failed session renewals.
pub static SESSION_RENEW_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "volrank_session_renew_failures_total",
        "Failed session token renewals"
    )
    .unwrap()
});

/// Sessions restarted after the renewal retry budget ran out.
pub static SESSION_RESTARTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "volrank_session_restarts_total",
        "Sessions restarted after expiry"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a transport opening.
    pub fn ws_opened(stream: &str) {
        WS_OPENED_TOTAL.with_label_values(&[stream]).inc();
    }

    /// Record a keep-alive timeout.
    pub fn ws_reconnect(stream: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[stream]).inc();
    }

    pub fn ws_message(stream: &str) {
        WS_MESSAGES_TOTAL.with_label_values(&[stream]).inc();
    }

    pub fn malformed_frame(stream: &str) {
        MALFORMED_FRAMES_TOTAL.with_label_values(&[stream]).inc();
    }

    /// Record trade latency. Negative samples (clock skew) land in the
    /// lowest bucket.
    pub fn trade_latency(latency_ms: i64) {
        TRADE_LATENCY_MS.observe(latency_ms as f64);
    }

    pub fn rank_swaps(count: usize) {
        RANK_SWAPS_TOTAL.inc_by(count as u64);
    }

    pub fn tracked_pairs(count: usize) {
        TRACKED_PAIRS.set(count as i64);
    }

    pub fn session_renew_failed() {
        SESSION_RENEW_FAILURES_TOTAL.inc();
    }

    pub fn session_restarted() {
        SESSION_RESTARTS_TOTAL.inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
