//! Sequence-indexed windows for outgoing and incoming datagrams
//!
//! [`ResendWindow`] keeps the encoded bytes of every datagram that carries
//! reliable frames until the peer acknowledges it. [`ReceiveWindow`] remembers
//! which incoming sequence numbers have been seen so duplicates can be
//! rejected and gaps reported.

use crate::ack::AckRange;
use crate::sequence::SeqNumber;
use bytes::Bytes;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Resend window is full ({0} datagrams in flight)")]
    Full(usize),

    #[error("Sequence number {0} is outside the window")]
    OutOfRange(SeqNumber),

    #[error("Ordering channel {0} out of range")]
    ChannelOutOfRange(u8),
}

/// Datagram awaiting acknowledgment
#[derive(Debug, Clone)]
struct InFlight {
    seq: SeqNumber,
    datagram: Bytes,
    first_sent: Instant,
    last_sent: Instant,
    retries: u32,
}

/// Circular store of unacknowledged datagrams
///
/// Slots are indexed by `seq & mask`; the live span runs from the oldest
/// unacknowledged sequence number to the newest stored one and can never
/// exceed the capacity, so two live entries never share a slot.
pub struct ResendWindow {
    slots: Vec<Option<InFlight>>,
    capacity: usize,
    mask: usize,
    /// Oldest possibly-unacknowledged sequence number
    oldest: SeqNumber,
    /// One past the newest stored sequence number
    next: SeqNumber,
    len: usize,
}

impl ResendWindow {
    /// Create a new window (capacity rounded up to a power of two)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();

        ResendWindow {
            slots: vec![None; capacity],
            capacity,
            mask: capacity - 1,
            oldest: SeqNumber::ZERO,
            next: SeqNumber::ZERO,
            len: 0,
        }
    }

    #[inline]
    fn index(&self, seq: SeqNumber) -> usize {
        (seq.as_raw() as usize) & self.mask
    }

    fn span(&self) -> u32 {
        self.oldest.distance_to(self.next).max(0) as u32
    }

    /// Whether `seq` could be stored without evicting a live entry
    pub fn can_insert(&self, seq: SeqNumber) -> bool {
        if self.len == 0 {
            return true;
        }
        let distance = self.oldest.distance_to(seq);
        distance >= 0 && (distance as usize) < self.capacity
    }

    /// Store a datagram that was just transmitted
    pub fn insert(&mut self, seq: SeqNumber, datagram: Bytes, now: Instant) -> Result<(), BufferError> {
        if self.len == 0 {
            self.oldest = seq;
            self.next = seq;
        } else if !self.can_insert(seq) {
            return Err(BufferError::Full(self.len));
        }

        let idx = self.index(seq);
        if self.slots[idx].is_none() {
            self.len += 1;
        }
        self.slots[idx] = Some(InFlight {
            seq,
            datagram,
            first_sent: now,
            last_sent: now,
            retries: 0,
        });

        if seq.ge(self.next) {
            self.next = seq.next();
        }

        Ok(())
    }

    fn entry(&self, seq: SeqNumber) -> Option<&InFlight> {
        self.slots[self.index(seq)]
            .as_ref()
            .filter(|entry| entry.seq == seq)
    }

    fn entry_mut(&mut self, seq: SeqNumber) -> Option<&mut InFlight> {
        let idx = self.index(seq);
        self.slots[idx].as_mut().filter(|entry| entry.seq == seq)
    }

    /// Encoded bytes of a stored datagram
    pub fn get(&self, seq: SeqNumber) -> Option<&Bytes> {
        self.entry(seq).map(|entry| &entry.datagram)
    }

    /// Number of times a stored datagram has been retransmitted
    pub fn retries(&self, seq: SeqNumber) -> Option<u32> {
        self.entry(seq).map(|entry| entry.retries)
    }

    /// Time since a stored datagram was first transmitted
    pub fn age(&self, seq: SeqNumber, now: Instant) -> Option<Duration> {
        self.entry(seq)
            .map(|entry| now.saturating_duration_since(entry.first_sent))
    }

    /// Drop an acknowledged datagram; returns whether it was present
    pub fn acknowledge(&mut self, seq: SeqNumber) -> bool {
        let idx = self.index(seq);
        match &self.slots[idx] {
            Some(entry) if entry.seq == seq => {
                self.slots[idx] = None;
                self.len -= 1;
                self.advance_oldest();
                true
            }
            _ => false,
        }
    }

    /// Drop every acknowledged datagram in a range
    pub fn acknowledge_range(&mut self, range: &AckRange) -> usize {
        self.covered(range)
            .into_iter()
            .filter(|seq| self.acknowledge(*seq))
            .count()
    }

    /// Stored sequence numbers inside `range`, oldest first
    ///
    /// Walks whichever is shorter, the range or the live span, so a hostile
    /// range covering millions of numbers costs no more than the window.
    pub fn covered(&self, range: &AckRange) -> Vec<SeqNumber> {
        if self.len == 0 {
            return Vec::new();
        }

        if range.len() <= self.span() as usize {
            range.iter().filter(|seq| self.entry(*seq).is_some()).collect()
        } else {
            self.live()
                .filter(|seq| range.contains(*seq))
                .collect()
        }
    }

    fn live(&self) -> impl Iterator<Item = SeqNumber> + '_ {
        let oldest = self.oldest;
        (0..self.span())
            .map(move |offset| oldest + offset)
            .filter(|seq| self.entry(*seq).is_some())
    }

    /// Sequence numbers whose last transmission is at least `interval` old
    pub fn due(&self, now: Instant, interval: Duration) -> Vec<SeqNumber> {
        self.live()
            .filter(|seq| {
                self.entry(*seq).is_some_and(|entry| {
                    now.saturating_duration_since(entry.last_sent) >= interval
                })
            })
            .collect()
    }

    /// Record a retransmission and return the original bytes
    pub fn mark_resent(&mut self, seq: SeqNumber, now: Instant) -> Option<Bytes> {
        let entry = self.entry_mut(seq)?;
        entry.retries += 1;
        entry.last_sent = now;
        Some(entry.datagram.clone())
    }

    fn advance_oldest(&mut self) {
        if self.len == 0 {
            self.oldest = self.next;
            return;
        }
        while self.oldest.lt(self.next) && self.entry(self.oldest).is_none() {
            self.oldest = self.oldest.next();
        }
    }

    /// Number of datagrams awaiting acknowledgment
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest unacknowledged sequence number, if any
    pub fn oldest(&self) -> Option<SeqNumber> {
        (self.len > 0).then_some(self.oldest)
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.len = 0;
        self.oldest = self.next;
    }
}

/// Result of recording an incoming sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Seen before
    Duplicate,
    /// First arrival; `gap` holds numbers skipped since the previous highest
    New { gap: Option<AckRange> },
}

/// Sliding record of incoming sequence numbers
///
/// Everything below `start` counts as seen. Numbers at or above `start` are
/// tracked individually until the run from `start` becomes contiguous. A
/// number more than `size` ahead of `start` slides the window forward,
/// forgetting the oldest holes.
#[derive(Debug)]
pub struct ReceiveWindow {
    start: SeqNumber,
    highest: Option<SeqNumber>,
    seen: HashSet<SeqNumber>,
    size: u32,
}

impl ReceiveWindow {
    pub fn new(size: u32) -> Self {
        ReceiveWindow {
            start: SeqNumber::ZERO,
            highest: None,
            seen: HashSet::new(),
            size: size.max(1),
        }
    }

    /// Record an arrival
    pub fn insert(&mut self, seq: SeqNumber) -> Received {
        if self.highest.is_none() && !self.in_window(seq) {
            self.start = seq;
        }
        if seq.lt(self.start) || self.seen.contains(&seq) {
            return Received::Duplicate;
        }

        let distance = self.start.distance_to(seq) as u32;
        if distance >= self.size {
            let start = seq - (self.size - 1);
            self.seen.retain(|s| s.ge(start));
            self.start = start;
        }

        let expected = match self.highest {
            Some(highest) if highest.ge(self.start) => highest.next(),
            _ => self.start,
        };
        let gap = if seq.gt(expected) {
            Some(AckRange::new(expected, seq - 1))
        } else {
            None
        };
        if self.highest.map_or(true, |highest| seq.gt(highest)) {
            self.highest = Some(seq);
        }

        self.seen.insert(seq);
        while self.seen.remove(&self.start) {
            self.start = self.start.next();
        }

        Received::New { gap }
    }

    fn in_window(&self, seq: SeqNumber) -> bool {
        let distance = self.start.distance_to(seq);
        distance >= 0 && (distance as u32) < self.size
    }

    /// Whether [`insert`](Self::insert) would report `seq` as a duplicate
    ///
    /// Unlike [`contains`](Self::contains) this honours the re-anchoring of
    /// an empty window.
    pub fn is_duplicate(&self, seq: SeqNumber) -> bool {
        if self.highest.is_none() && !self.in_window(seq) {
            return false;
        }
        self.contains(seq)
    }

    /// Whether `seq` has been recorded
    pub fn contains(&self, seq: SeqNumber) -> bool {
        seq.lt(self.start) || self.seen.contains(&seq)
    }

    /// Lowest sequence number not yet received
    pub fn start(&self) -> SeqNumber {
        self.start
    }

    pub fn highest(&self) -> Option<SeqNumber> {
        self.highest
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MAX_SEQ_NUMBER;

    fn seq(value: u32) -> SeqNumber {
        SeqNumber::new(value)
    }

    fn datagram(tag: u8) -> Bytes {
        Bytes::from(vec![0x84, tag, 0, 0])
    }

    #[test]
    fn test_resend_insert_acknowledge() {
        let now = Instant::now();
        let mut window = ResendWindow::new(16);

        window.insert(seq(0), datagram(0), now).unwrap();
        window.insert(seq(1), datagram(1), now).unwrap();
        window.insert(seq(3), datagram(3), now).unwrap();
        assert_eq!(window.len(), 3);

        assert!(window.acknowledge(seq(1)));
        assert!(!window.acknowledge(seq(1)));
        assert_eq!(window.oldest(), Some(seq(0)));

        assert!(window.acknowledge(seq(0)));
        assert_eq!(window.oldest(), Some(seq(3)));
        assert_eq!(window.get(seq(3)), Some(&datagram(3)));
    }

    #[test]
    fn test_resend_window_full() {
        let now = Instant::now();
        let mut window = ResendWindow::new(4);

        for i in 0..4 {
            window.insert(seq(i), datagram(i as u8), now).unwrap();
        }
        assert_eq!(
            window.insert(seq(4), datagram(4), now),
            Err(BufferError::Full(4))
        );

        window.acknowledge(seq(0));
        assert!(window.insert(seq(4), datagram(4), now).is_ok());
    }

    #[test]
    fn test_resend_due_and_retries() {
        let start = Instant::now();
        let interval = Duration::from_millis(300);
        let mut window = ResendWindow::new(16);
        window.insert(seq(7), datagram(7), start).unwrap();

        assert!(window.due(start + Duration::from_millis(299), interval).is_empty());
        assert_eq!(window.due(start + interval, interval), vec![seq(7)]);

        let bytes = window.mark_resent(seq(7), start + interval).unwrap();
        assert_eq!(bytes, datagram(7));
        assert_eq!(window.retries(seq(7)), Some(1));
        assert!(window.due(start + interval, interval).is_empty());
    }

    #[test]
    fn test_acknowledge_range_across_wrap() {
        let now = Instant::now();
        let mut window = ResendWindow::new(16);
        for raw in [MAX_SEQ_NUMBER - 1, MAX_SEQ_NUMBER, 0, 1, 2] {
            window.insert(seq(raw), datagram(raw as u8), now).unwrap();
        }

        let acked = window.acknowledge_range(&AckRange::new(seq(MAX_SEQ_NUMBER), seq(1)));
        assert_eq!(acked, 3);
        assert_eq!(window.len(), 2);
        assert_eq!(window.oldest(), Some(seq(MAX_SEQ_NUMBER - 1)));
    }

    #[test]
    fn test_huge_range_walks_window_only() {
        let now = Instant::now();
        let mut window = ResendWindow::new(16);
        window.insert(seq(100), datagram(1), now).unwrap();

        let everything = AckRange::new(seq(0), seq(MAX_SEQ_NUMBER / 2 - 1));
        assert_eq!(window.covered(&everything), vec![seq(100)]);
    }

    #[test]
    fn test_receive_duplicates() {
        let mut window = ReceiveWindow::new(64);

        assert_eq!(window.insert(seq(0)), Received::New { gap: None });
        assert_eq!(window.insert(seq(0)), Received::Duplicate);
        assert_eq!(window.start(), seq(1));
    }

    #[test]
    fn test_receive_gap_reported_once() {
        let mut window = ReceiveWindow::new(64);
        window.insert(seq(0));

        assert_eq!(
            window.insert(seq(4)),
            Received::New {
                gap: Some(AckRange::new(seq(1), seq(3)))
            }
        );
        // Filling the hole reports nothing new
        assert_eq!(window.insert(seq(2)), Received::New { gap: None });
        assert_eq!(window.start(), seq(1));

        window.insert(seq(1));
        window.insert(seq(3));
        assert_eq!(window.start(), seq(5));
        assert_eq!(window.insert(seq(3)), Received::Duplicate);
    }

    #[test]
    fn test_receive_window_slides() {
        let mut window = ReceiveWindow::new(8);
        window.insert(seq(0));

        window.insert(seq(20));
        assert_eq!(window.start(), seq(13));
        assert!(window.contains(seq(5)));
        assert_eq!(window.insert(seq(12)), Received::Duplicate);
    }

    #[test]
    fn test_receive_across_wrap() {
        let mut window = ReceiveWindow::new(64);
        window.insert(seq(MAX_SEQ_NUMBER - 1));
        assert_eq!(window.start(), seq(MAX_SEQ_NUMBER));

        assert_eq!(
            window.insert(seq(1)),
            Received::New {
                gap: Some(AckRange::new(seq(MAX_SEQ_NUMBER), seq(0)))
            }
        );
        window.insert(seq(MAX_SEQ_NUMBER));
        window.insert(seq(0));
        assert_eq!(window.start(), seq(2));
        assert_eq!(window.insert(seq(MAX_SEQ_NUMBER)), Received::Duplicate);
    }

    #[test]
    fn test_is_duplicate_matches_insert() {
        let mut window = ReceiveWindow::new(64);

        // An empty window re-anchors, so nothing counts as seen yet
        assert!(!window.is_duplicate(seq(MAX_SEQ_NUMBER - 1)));
        assert!(!window.is_duplicate(seq(0)));

        window.insert(seq(MAX_SEQ_NUMBER - 1));
        assert!(window.is_duplicate(seq(MAX_SEQ_NUMBER - 1)));
        assert!(window.is_duplicate(seq(MAX_SEQ_NUMBER - 5)));
        assert!(!window.is_duplicate(seq(MAX_SEQ_NUMBER)));
        assert!(!window.is_duplicate(seq(3)));
    }
}
