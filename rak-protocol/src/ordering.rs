//! Per-channel ordering and sequencing
//!
//! Ordered frames are held back until every lower order index of their
//! channel has been delivered. Sequenced frames are never held back; a frame
//! older than the newest one already delivered on its channel is dropped.

use crate::buffer::BufferError;
use crate::sequence::SeqNumber;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::trace;

/// Number of independent ordering channels per connection
pub const ORDERING_CHANNELS: usize = 32;

/// Receive side of one ordering channel
#[derive(Debug)]
pub struct OrderingChannel {
    /// Next order index to deliver
    next_expected: SeqNumber,
    /// Out-of-order frames waiting for the gap before them to fill
    pending: HashMap<SeqNumber, Bytes>,
    /// Newest sequenced index delivered
    last_sequenced: Option<SeqNumber>,
    /// Maximum distance ahead of `next_expected` that is buffered
    window: u32,
}

impl OrderingChannel {
    pub fn new(window: u32) -> Self {
        OrderingChannel {
            next_expected: SeqNumber::ZERO,
            pending: HashMap::new(),
            last_sequenced: None,
            window,
        }
    }

    /// Accept an ordered frame and append every frame now deliverable to `out`
    ///
    /// Frames behind `next_expected` are stale duplicates and are ignored.
    pub fn insert_ordered(
        &mut self,
        index: SeqNumber,
        payload: Bytes,
        out: &mut Vec<Bytes>,
    ) -> Result<(), BufferError> {
        if index.lt(self.next_expected) {
            trace!(%index, expected = %self.next_expected, "Stale ordered frame");
            return Ok(());
        }

        if self.next_expected.distance_to(index) as u32 >= self.window {
            return Err(BufferError::OutOfRange(index));
        }

        if index != self.next_expected {
            self.pending.entry(index).or_insert(payload);
            return Ok(());
        }

        out.push(payload);
        self.next_expected = self.next_expected.next();

        while let Some(payload) = self.pending.remove(&self.next_expected) {
            out.push(payload);
            self.next_expected = self.next_expected.next();
        }

        Ok(())
    }

    /// Whether a sequenced frame is newer than everything delivered so far
    ///
    /// Accepting the frame records it as the newest.
    pub fn accept_sequenced(&mut self, index: SeqNumber) -> bool {
        match self.last_sequenced {
            Some(last) if !index.gt(last) => false,
            _ => {
                self.last_sequenced = Some(index);
                true
            }
        }
    }

    /// Next order index this channel will deliver
    pub fn next_expected(&self) -> SeqNumber {
        self.next_expected
    }

    /// Number of frames held back
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Send side counters of every channel
#[derive(Debug, Default)]
pub struct OutgoingChannels {
    order: [SeqNumber; ORDERING_CHANNELS],
    sequence: [SeqNumber; ORDERING_CHANNELS],
}

impl OutgoingChannels {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(channel: u8) -> Result<usize, BufferError> {
        let slot = channel as usize;
        if slot >= ORDERING_CHANNELS {
            return Err(BufferError::ChannelOutOfRange(channel));
        }
        Ok(slot)
    }

    /// Take the next order index of a channel
    pub fn next_order(&mut self, channel: u8) -> Result<SeqNumber, BufferError> {
        let slot = Self::slot(channel)?;
        Ok(self.order[slot].fetch_increment())
    }

    /// Take the next sequence index of a channel
    pub fn next_sequence(&mut self, channel: u8) -> Result<SeqNumber, BufferError> {
        let slot = Self::slot(channel)?;
        Ok(self.sequence[slot].fetch_increment())
    }

    /// Current order index of a channel without consuming it
    pub fn order(&self, channel: u8) -> Result<SeqNumber, BufferError> {
        Ok(self.order[Self::slot(channel)?])
    }
}
