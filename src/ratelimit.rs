//! Sliding-window rate limiter for per-session chat sends.
//!
//! Only `text` and `action` sends go through this (spec.md §5): command
//! dispatch, nick changes, room joins, and system-originated messages are
//! exempt and never call `record`.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_millis(1000);

/// Counts timestamps in a trailing 1-second window and admits up to
/// `max_per_second` of them.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: usize,
    timestamps: Vec<Instant>,
}

impl RateLimiter {
    pub fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second,
            timestamps: Vec::with_capacity(max_per_second),
        }
    }

    /// Default of 10 actions/second, per spec.md §4.2.
    pub fn with_default_rate() -> Self {
        Self::new(10)
    }

    fn evict_expired(&mut self, now: Instant) {
        self.timestamps
            .retain(|&t| now.duration_since(t) < WINDOW);
    }

    /// True iff admitting one more action right now would not exceed the window limit.
    pub fn can_proceed(&mut self) -> bool {
        let now = Instant::now();
        self.evict_expired(now);
        self.timestamps.len() < self.max_per_second
    }

    /// Attempt to record one action now. Returns `false` (and records nothing)
    /// if the window is already full.
    pub fn record(&mut self) -> bool {
        if !self.can_proceed() {
            return false;
        }
        self.timestamps.push(Instant::now());
        true
    }

    pub fn reset(&mut self) {
        self.timestamps.clear();
    }
}
