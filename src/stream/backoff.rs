use std::time::Duration;

use serde::Serialize;

/// First retry delay after a transport failure.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Multiplier applied to the delay after every failed attempt.
pub const BACKOFF_FACTOR: f64 = 1.5;
/// Delay ceiling; retries continue indefinitely at this pace.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Bounded exponential backoff. The delay sequence for consecutive failures
/// is non-decreasing and capped at `max`; any successful connection resets it
/// to `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Backoff {
            current: initial,
            initial,
            factor,
            max,
        }
    }

    /// Delay to wait before the next attempt. Advances the internal delay for
    /// the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(INITIAL_RETRY_DELAY, BACKOFF_FACTOR, MAX_RETRY_DELAY)
    }
}

/// Connection health of one stream subscriber instance, surfaced to the UI as
/// a neutral "disconnected/reconnecting" indicator. Transport failures never
/// raise faults; they only move this state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl ConnectionState {
    /// Disabled or empty subscription set.
    pub fn idle(&mut self) {
        self.is_connected = false;
        self.is_connecting = false;
    }

    pub fn connecting(&mut self) {
        self.is_connected = false;
        self.is_connecting = true;
    }

    /// Successful open: error cleared, retry counter back to zero.
    pub fn connected(&mut self) {
        self.is_connected = true;
        self.is_connecting = false;
        self.last_error = None;
        self.retry_count = 0;
    }

    pub fn disconnected(&mut self, error: impl Into<String>) {
        self.is_connected = false;
        self.is_connecting = false;
        self.last_error = Some(error.into());
        self.retry_count += 1;
    }
}
