//! Receive-side loss tracking
//!
//! Gaps in the incoming datagram sequence are recorded here and reported
//! back to the peer in NACK packets. A gap is reported at most
//! `max_nack_count` times, no more often than `nack_interval`, and is dropped
//! as soon as the missing datagram arrives.

use crate::ack::NackRange;
use crate::sequence::SeqNumber;
use std::time::{Duration, Instant};

/// Loss entry with timing information
#[derive(Debug, Clone)]
struct LossEntry {
    range: NackRange,
    detected_at: Instant,
    last_nack_sent: Option<Instant>,
    nack_count: u32,
}

/// Ordered list of missing datagram ranges
#[derive(Debug)]
pub struct ReceiverLossList {
    /// Entries sorted by sequence number, never overlapping
    losses: Vec<LossEntry>,
    max_nack_count: u32,
    nack_interval: Duration,
}

impl ReceiverLossList {
    /// Create a new receiver loss list
    ///
    /// # Arguments
    /// * `max_nack_count` - Maximum times a single gap is reported
    /// * `nack_interval` - Minimum interval between reports of the same gap
    pub fn new(max_nack_count: u32, nack_interval: Duration) -> Self {
        ReceiverLossList {
            losses: Vec::new(),
            max_nack_count,
            nack_interval,
        }
    }

    /// Record a single missing datagram
    pub fn add(&mut self, seq: SeqNumber, now: Instant) {
        self.add_range(NackRange::single(seq), now);
    }

    /// Record a run of missing datagrams
    pub fn add_range(&mut self, range: NackRange, now: Instant) {
        let mut merged = LossEntry {
            range,
            detected_at: now,
            last_nack_sent: None,
            nack_count: 0,
        };
        let mut losses = Vec::with_capacity(self.losses.len() + 1);

        for existing in self.losses.drain(..) {
            if let Some(range) = merged.range.try_merge(&existing.range) {
                merged.range = range;
                if existing.detected_at < merged.detected_at {
                    merged.detected_at = existing.detected_at;
                }
                merged.nack_count = merged.nack_count.max(existing.nack_count);
                merged.last_nack_sent = merged.last_nack_sent.or(existing.last_nack_sent);
            } else if existing.range.start.lt(merged.range.start) {
                losses.push(existing);
            } else {
                losses.push(merged);
                merged = existing;
            }
        }

        losses.push(merged);
        self.losses = losses;
    }

    /// Forget a datagram that has arrived
    pub fn remove(&mut self, seq: SeqNumber) {
        let Some(pos) = self.losses.iter().position(|e| e.range.contains(seq)) else {
            return;
        };

        let entry = self.losses.remove(pos);
        let range = entry.range;
        if range.is_single() {
            return;
        }

        if seq == range.start {
            self.losses.insert(
                pos,
                LossEntry {
                    range: NackRange::new(range.start.next(), range.end),
                    ..entry
                },
            );
        } else if seq == range.end {
            self.losses.insert(
                pos,
                LossEntry {
                    range: NackRange::new(range.start, range.end - 1),
                    ..entry
                },
            );
        } else {
            let tail = LossEntry {
                range: NackRange::new(seq.next(), range.end),
                ..entry.clone()
            };
            self.losses.insert(
                pos,
                LossEntry {
                    range: NackRange::new(range.start, seq - 1),
                    ..entry
                },
            );
            self.losses.insert(pos + 1, tail);
        }
    }

    /// Ranges due for a NACK at `now`
    ///
    /// Entries that have been reported `max_nack_count` times are retired.
    pub fn nack_ranges(&mut self, now: Instant) -> Vec<NackRange> {
        let mut ranges = Vec::new();

        for entry in &mut self.losses {
            let due = match entry.last_nack_sent {
                None => true,
                Some(last_sent) => {
                    now.saturating_duration_since(last_sent) >= self.nack_interval
                        && entry.nack_count < self.max_nack_count
                }
            };

            if due {
                ranges.push(entry.range);
                entry.last_nack_sent = Some(now);
                entry.nack_count += 1;
            }
        }

        let max = self.max_nack_count;
        self.losses.retain(|entry| entry.nack_count < max);

        ranges
    }

    /// All tracked ranges
    pub fn ranges(&self) -> Vec<NackRange> {
        self.losses.iter().map(|e| e.range).collect()
    }

    /// Total number of missing datagrams
    pub fn len(&self) -> usize {
        self.losses.iter().map(|e| e.range.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    pub fn contains(&self, seq: SeqNumber) -> bool {
        self.losses.iter().any(|e| e.range.contains(seq))
    }

    pub fn clear(&mut self) {
        self.losses.clear();
    }
}
