//! ACK and NACK packets
//!
//! Both packets carry a list of inclusive sequence ranges ("records"). A
//! record is either a single sequence number or a `[low, high]` pair, which
//! keeps acknowledgments of long runs of datagrams compact.

use crate::codec::{RakBuf, RakBufMut};
use crate::packet::{PacketError, UDP_HEADER_SIZE};
use crate::sequence::SeqNumber;
use bytes::{BufMut, BytesMut};

/// Identifier + u16 record count
const ACK_HEADER_SIZE: usize = 3;

/// Single flag + two 24-bit sequence numbers
const MAX_RECORD_SIZE: usize = 7;

/// Inclusive range of sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckRange {
    /// First sequence number in range
    pub start: SeqNumber,
    /// Last sequence number in range (inclusive)
    pub end: SeqNumber,
}

/// Ranges carried by a NACK have the same shape as ACK ranges
pub type NackRange = AckRange;

impl AckRange {
    /// Create a new range; `end` is normalised so it never precedes `start`
    pub fn new(start: SeqNumber, end: SeqNumber) -> Self {
        if end.lt(start) {
            AckRange { start, end: start }
        } else {
            AckRange { start, end }
        }
    }

    /// Create a single-number range
    pub fn single(seq: SeqNumber) -> Self {
        AckRange {
            start: seq,
            end: seq,
        }
    }

    /// Check if this range contains a sequence number
    pub fn contains(&self, seq: SeqNumber) -> bool {
        seq.ge(self.start) && seq.le(self.end)
    }

    /// Number of sequence numbers covered
    pub fn len(&self) -> usize {
        (self.start.distance_to(self.end).max(0) as usize) + 1
    }

    /// Ranges always cover at least one number
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check if this is a single sequence number
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Iterate the covered sequence numbers in order
    pub fn iter(&self) -> impl Iterator<Item = SeqNumber> {
        let start = self.start;
        (0..self.len() as u32).map(move |offset| start + offset)
    }

    /// Merge with another range if they overlap or are adjacent
    pub fn try_merge(&self, other: &AckRange) -> Option<AckRange> {
        if other.start.le(self.end.next()) && other.end.ge(self.start - 1) {
            Some(AckRange {
                start: if self.start.lt(other.start) {
                    self.start
                } else {
                    other.start
                },
                end: if self.end.gt(other.end) {
                    self.end
                } else {
                    other.end
                },
            })
        } else {
            None
        }
    }

    /// Coalesce a set of sequence numbers into the minimal list of ranges
    ///
    /// Numbers are ordered by their distance from `base`, so runs that cross
    /// the 24-bit wrap still collapse into one range.
    pub fn coalesce(base: SeqNumber, seqs: &[SeqNumber]) -> Vec<AckRange> {
        let mut sorted = seqs.to_vec();
        sorted.sort_by_key(|seq| base.distance_to(*seq));
        sorted.dedup();

        let mut ranges: Vec<AckRange> = Vec::new();
        for seq in sorted {
            match ranges.last_mut() {
                Some(last) if last.end.next() == seq => last.end = seq,
                _ => ranges.push(AckRange::single(seq)),
            }
        }
        ranges
    }
}

/// ACK (0xc0) or NACK (0xa0) payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckPacket {
    pub ranges: Vec<AckRange>,
}

impl AckPacket {
    /// Create a new packet from ranges
    pub fn new(ranges: Vec<AckRange>) -> Self {
        AckPacket { ranges }
    }

    /// Encoded size
    pub fn size(&self) -> usize {
        ACK_HEADER_SIZE
            + self
                .ranges
                .iter()
                .map(|r| if r.is_single() { 4 } else { 7 })
                .sum::<usize>()
    }

    /// Serialize with the given identifier (ACK or NACK)
    pub fn to_bytes(&self, packet_id: u8) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u8(packet_id);
        buf.put_u16(self.ranges.len() as u16);

        for range in &self.ranges {
            if range.is_single() {
                buf.put_bool(true);
                buf.put_seq(range.start);
            } else {
                buf.put_bool(false);
                buf.put_seq(range.start);
                buf.put_seq(range.end);
            }
        }

        buf
    }

    /// Parse from a datagram (first byte is the identifier)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut buf = bytes;
        buf.read_u8()?;
        let count = buf.read_u16()? as usize;

        // Each record is at least four bytes; reject counts the datagram cannot hold
        buf.ensure(count * 4)?;

        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            let single = buf.read_bool()?;
            let start = buf.read_seq()?;
            let end = if single { start } else { buf.read_seq()? };
            ranges.push(AckRange::new(start, end));
        }

        Ok(AckPacket { ranges })
    }

    /// Split ranges over as many packets as needed to respect the MTU
    pub fn chunked(ranges: Vec<AckRange>, mtu: u16) -> Vec<AckPacket> {
        let budget = (mtu as usize).saturating_sub(UDP_HEADER_SIZE + ACK_HEADER_SIZE);
        let per_packet = (budget / MAX_RECORD_SIZE).clamp(1, u16::MAX as usize);

        ranges
            .chunks(per_packet)
            .map(|chunk| AckPacket::new(chunk.to_vec()))
            .collect()
    }
}
