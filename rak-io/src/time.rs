//! Tick timer
//!
//! The server loop wakes up for datagrams and for periodic connection
//! maintenance. [`Timer`] tracks when the next maintenance tick is due. It
//! never reads the clock itself; callers pass `now`.

use std::time::{Duration, Instant};

/// Timer for periodic operations
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a timer whose first expiry is one interval after `now`
    pub fn new(interval: Duration, now: Instant) -> Self {
        Timer {
            interval,
            last_fire: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the timer has expired
    pub fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_fire) >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self, now: Instant) {
        self.last_fire = now;
    }

    /// Instant of the next expiry
    pub fn deadline(&self) -> Instant {
        self.last_fire + self.interval
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if self.expired(now) {
            self.reset(now);
            true
        } else {
            false
        }
    }
}
