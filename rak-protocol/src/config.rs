//! Per-connection reliability policy

use crate::packet::{MAX_MTU, MIN_MTU};
use std::time::Duration;

/// Timers and limits applied by every [`Connection`](crate::Connection)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Upper bound for negotiated MTUs
    pub max_mtu: u16,
    /// Age after which an unacknowledged datagram is sent again
    pub resend_interval: Duration,
    /// Retransmissions of one datagram before the peer is considered gone
    pub max_retries: u32,
    /// Silence after which the connection times out
    pub timeout: Duration,
    /// Time an incomplete split payload is kept
    pub split_timeout: Duration,
    /// Minimum interval between NACKs for the same gap
    pub nack_interval: Duration,
    /// Times a single gap is NACKed before giving up
    pub max_nack_count: u32,
    /// Largest fragment count accepted for one split payload
    pub max_split_count: u32,
    /// Split payloads reassembled concurrently
    pub max_concurrent_splits: usize,
    /// How far ahead of the expected index frames are buffered or tracked
    pub reorder_window: u32,
    /// Unacknowledged datagrams kept for retransmission
    pub resend_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            max_mtu: MAX_MTU,
            resend_interval: Duration::from_millis(300),
            max_retries: 10,
            timeout: Duration::from_secs(10),
            split_timeout: Duration::from_secs(30),
            nack_interval: Duration::from_millis(100),
            max_nack_count: 3,
            max_split_count: 1024,
            max_concurrent_splits: 64,
            reorder_window: 2048,
            resend_capacity: 8192,
        }
    }
}

impl ConnectionConfig {
    /// Check the values are usable
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.max_mtu) {
            return Err(format!(
                "max MTU {} outside {}..={}",
                self.max_mtu, MIN_MTU, MAX_MTU
            ));
        }
        if self.resend_interval.is_zero() {
            return Err("resend interval must be positive".into());
        }
        if self.timeout <= self.resend_interval {
            return Err("timeout must exceed the resend interval".into());
        }
        if self.max_split_count == 0 || self.max_concurrent_splits == 0 {
            return Err("split limits must be positive".into());
        }
        if self.reorder_window == 0 || self.reorder_window >= 0x80_0000 {
            return Err("reorder window must be within half the sequence space".into());
        }
        if self.resend_capacity == 0 || self.resend_capacity >= 0x80_0000 {
            return Err("resend capacity must be within half the sequence space".into());
        }
        Ok(())
    }
}
