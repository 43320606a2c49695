//! Liveness tracking for stream connections.
//!
//! The exchange pushes data continuously and answers our silence with its
//! own pings, so any inbound frame counts as proof of life. There is no
//! client-side ping: if nothing arrives within the keep-alive window the
//! transport is considered dead.

use std::time::Duration;
use tokio::time::Instant;

/// Default keep-alive window (10 minutes).
pub const DEFAULT_KEEP_ALIVE_WINDOW: Duration = Duration::from_secs(600);

/// Deadline by which the next inbound frame must arrive.
#[derive(Debug, Clone, Copy)]
pub struct LivenessDeadline {
    window: Duration,
    expires_at: Instant,
}

impl LivenessDeadline {
    /// Start a deadline that expires one full window after `now`.
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            expires_at: now + window,
        }
    }

    /// Record inbound activity, pushing the deadline to `now + window`.
    pub fn touch(&mut self, now: Instant) {
        self.expires_at = now + self.window;
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}
