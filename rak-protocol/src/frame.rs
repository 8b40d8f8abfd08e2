//! Frames and Frame-Sets
//!
//! A frame-set datagram carries its own 24-bit sequence number (the unit
//! that is acknowledged and retransmitted) followed by one or more frames.
//! Each frame is tagged with a reliability kind that decides which of the
//! optional index fields are present on the wire.

use crate::codec::{RakBuf, RakBufMut};
use crate::packet::{PacketError, FRAME_SET_HEADER_SIZE, FRAME_SET_ID};
use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Flags bit marking a fragment of a split payload
const SPLIT_FLAG: u8 = 0x10;

/// Flags + u16 bit length
const FRAME_BASE_HEADER: usize = 3;

/// u32 count + u16 id + u32 index
const SPLIT_HEADER_SIZE: usize = 10;

/// Worst-case frame header (reliable, sequenced, ordered and split)
pub const MAX_FRAME_HEADER_SIZE: usize = FRAME_BASE_HEADER + 3 + 3 + 4 + SPLIT_HEADER_SIZE;

/// Delivery guarantee requested for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reliability {
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

impl Reliability {
    pub fn from_bits(value: u8) -> Result<Self, PacketError> {
        match value {
            0 => Ok(Reliability::Unreliable),
            1 => Ok(Reliability::UnreliableSequenced),
            2 => Ok(Reliability::Reliable),
            3 => Ok(Reliability::ReliableOrdered),
            4 => Ok(Reliability::ReliableSequenced),
            5 => Ok(Reliability::UnreliableWithAckReceipt),
            6 => Ok(Reliability::ReliableWithAckReceipt),
            7 => Ok(Reliability::ReliableOrderedWithAckReceipt),
            other => Err(PacketError::InvalidReliability(other)),
        }
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }

    /// Carries a reliable message index and is retransmitted until acknowledged
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Reliability::Reliable
                | Reliability::ReliableOrdered
                | Reliability::ReliableSequenced
                | Reliability::ReliableWithAckReceipt
                | Reliability::ReliableOrderedWithAckReceipt
        )
    }

    /// Delivered strictly in order within its channel
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            Reliability::ReliableOrdered | Reliability::ReliableOrderedWithAckReceipt
        )
    }

    /// Delivered only if newer than the last delivered frame of its channel
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            Reliability::UnreliableSequenced | Reliability::ReliableSequenced
        )
    }

    /// Carries an order index and channel on the wire
    pub fn has_order_info(self) -> bool {
        self.is_ordered() || self.is_sequenced()
    }

    /// Variant used for fragments of a split payload, which must be retransmitted
    pub fn for_split(self) -> Self {
        match self {
            Reliability::Unreliable => Reliability::Reliable,
            Reliability::UnreliableSequenced => Reliability::ReliableSequenced,
            Reliability::UnreliableWithAckReceipt => Reliability::ReliableWithAckReceipt,
            other => other,
        }
    }
}

/// Ordering information for ordered and sequenced frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderInfo {
    pub index: SeqNumber,
    pub channel: u8,
}

/// Split metadata for one fragment of a larger payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitInfo {
    /// Total number of fragments
    pub count: u32,
    /// Identifier shared by all fragments of one payload
    pub id: u16,
    /// Position of this fragment
    pub index: u32,
}

/// One reliability-tagged unit of payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub reliability: Reliability,
    /// Present for reliable kinds
    pub reliable_index: Option<SeqNumber>,
    /// Present for sequenced kinds
    pub sequence_index: Option<SeqNumber>,
    /// Present for ordered and sequenced kinds
    pub order: Option<OrderInfo>,
    pub split: Option<SplitInfo>,
    pub payload: Bytes,
}

impl Frame {
    /// Create an unreliable, unsplit frame
    pub fn new(reliability: Reliability, payload: Bytes) -> Self {
        Frame {
            reliability,
            reliable_index: None,
            sequence_index: None,
            order: None,
            split: None,
            payload,
        }
    }

    /// Encoded header size for a reliability kind, with or without split metadata
    pub fn header_size_for(reliability: Reliability, split: bool) -> usize {
        let mut size = FRAME_BASE_HEADER;
        if reliability.is_reliable() {
            size += 3;
        }
        if reliability.is_sequenced() {
            size += 3;
        }
        if reliability.has_order_info() {
            size += 4;
        }
        if split {
            size += SPLIT_HEADER_SIZE;
        }
        size
    }

    /// Encoded header size of this frame
    pub fn header_size(&self) -> usize {
        Self::header_size_for(self.reliability, self.split.is_some())
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        self.header_size() + self.payload.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = self.reliability.as_bits() << 5;
        if self.split.is_some() {
            flags |= SPLIT_FLAG;
        }
        buf.put_u8(flags);
        buf.put_u16((self.payload.len() * 8) as u16);

        if self.reliability.is_reliable() {
            buf.put_seq(self.reliable_index.unwrap_or_default());
        }
        if self.reliability.is_sequenced() {
            buf.put_seq(self.sequence_index.unwrap_or_default());
        }
        if self.reliability.has_order_info() {
            let order = self.order.unwrap_or(OrderInfo {
                index: SeqNumber::ZERO,
                channel: 0,
            });
            buf.put_seq(order.index);
            buf.put_u8(order.channel);
        }
        if let Some(split) = self.split {
            buf.put_u32(split.count);
            buf.put_u16(split.id);
            buf.put_u32(split.index);
        }

        buf.put_slice(&self.payload);
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self, PacketError> {
        let flags = buf.read_u8()?;
        let reliability = Reliability::from_bits(flags >> 5)?;
        let bit_length = buf.read_u16()? as usize;
        let length = (bit_length + 7) / 8;

        let reliable_index = if reliability.is_reliable() {
            Some(buf.read_seq()?)
        } else {
            None
        };
        let sequence_index = if reliability.is_sequenced() {
            Some(buf.read_seq()?)
        } else {
            None
        };
        let order = if reliability.has_order_info() {
            Some(OrderInfo {
                index: buf.read_seq()?,
                channel: buf.read_u8()?,
            })
        } else {
            None
        };
        let split = if flags & SPLIT_FLAG != 0 {
            let count = buf.read_u32()?;
            let id = buf.read_u16()?;
            let index = buf.read_u32()?;
            if count == 0 || index >= count {
                return Err(PacketError::InvalidSplit { index, count });
            }
            Some(SplitInfo { count, id, index })
        } else {
            None
        };

        buf.ensure(length)?;
        let payload = Bytes::copy_from_slice(&buf[..length]);
        buf.advance(length);

        Ok(Frame {
            reliability,
            reliable_index,
            sequence_index,
            order,
            split,
            payload,
        })
    }
}

/// Datagram carrying one or more frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet {
    pub sequence: SeqNumber,
    pub frames: Vec<Frame>,
}

impl FrameSet {
    pub fn new(sequence: SeqNumber, frames: Vec<Frame>) -> Self {
        FrameSet { sequence, frames }
    }

    /// Encoded size
    pub fn size(&self) -> usize {
        FRAME_SET_HEADER_SIZE + self.frames.iter().map(Frame::size).sum::<usize>()
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u8(FRAME_SET_ID);
        buf.put_seq(self.sequence);
        for frame in &self.frames {
            frame.encode(&mut buf);
        }
        buf
    }

    /// Parse a frame-set; frames run to the end of the datagram
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut buf = bytes;
        buf.read_u8()?;
        let sequence = buf.read_seq()?;

        let mut frames = Vec::new();
        while buf.has_remaining() {
            frames.push(Frame::decode(&mut buf)?);
        }
        if frames.is_empty() {
            return Err(PacketError::EmptyFrameSet);
        }

        Ok(FrameSet { sequence, frames })
    }
}
