//! Packet Type Catalog
//!
//! Every datagram starts with a one-byte identifier. Connection-less control
//! packets (ping/pong and the open-connection handshake) have fixed
//! identifiers; connected traffic is either an ACK, a NACK, or a frame-set
//! whose identifier falls in a reserved range with the low nibble free for
//! flags. [`Packet::from_bytes`] turns a raw datagram into one closed variant
//! so routing is a single exhaustive `match`.

use crate::ack::AckPacket;
use crate::frame::FrameSet;
use crate::handshake::{
    IncompatibleProtocolVersion, NoFreeIncomingConnections, OpenConnectionReply1,
    OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2, UnconnectedPing,
    UnconnectedPong,
};
use bytes::{Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// IP header (20) + UDP header (8)
pub const UDP_HEADER_SIZE: usize = 28;

/// Datagram identifier + 24-bit frame-set sequence number
pub const FRAME_SET_HEADER_SIZE: usize = 4;

/// Smallest MTU the handshake accepts
pub const MIN_MTU: u16 = 400;

/// Largest MTU the handshake will agree to by default
pub const MAX_MTU: u16 = 1492;

/// One-byte packet identifiers
pub mod id {
    pub const UNCONNECTED_PING: u8 = 0x01;
    pub const UNCONNECTED_PING_OPEN_CONNECTIONS: u8 = 0x02;
    pub const OPEN_CONNECTION_REQUEST_1: u8 = 0x05;
    pub const OPEN_CONNECTION_REPLY_1: u8 = 0x06;
    pub const OPEN_CONNECTION_REQUEST_2: u8 = 0x07;
    pub const OPEN_CONNECTION_REPLY_2: u8 = 0x08;
    pub const NO_FREE_INCOMING_CONNECTIONS: u8 = 0x14;
    pub const INCOMPATIBLE_PROTOCOL_VERSION: u8 = 0x19;
    pub const UNCONNECTED_PONG: u8 = 0x1c;
    /// First identifier of the frame-set range
    pub const FRAME_SET_MIN: u8 = 0x80;
    /// Last identifier of the frame-set range
    pub const FRAME_SET_MAX: u8 = 0x8f;
    pub const NACK: u8 = 0xa0;
    pub const ACK: u8 = 0xc0;
}

/// Identifier used when this side emits a frame-set
pub const FRAME_SET_ID: u8 = 0x84;

/// Classified packet identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    UnconnectedPing,
    UnconnectedPingOpenConnections,
    UnconnectedPong,
    OpenConnectionRequest1,
    OpenConnectionReply1,
    OpenConnectionRequest2,
    OpenConnectionReply2,
    NoFreeIncomingConnections,
    IncompatibleProtocolVersion,
    Ack,
    Nack,
    FrameSet,
    Unknown(u8),
}

impl PacketType {
    pub fn from_id(value: u8) -> Self {
        match value {
            id::UNCONNECTED_PING => PacketType::UnconnectedPing,
            id::UNCONNECTED_PING_OPEN_CONNECTIONS => PacketType::UnconnectedPingOpenConnections,
            id::UNCONNECTED_PONG => PacketType::UnconnectedPong,
            id::OPEN_CONNECTION_REQUEST_1 => PacketType::OpenConnectionRequest1,
            id::OPEN_CONNECTION_REPLY_1 => PacketType::OpenConnectionReply1,
            id::OPEN_CONNECTION_REQUEST_2 => PacketType::OpenConnectionRequest2,
            id::OPEN_CONNECTION_REPLY_2 => PacketType::OpenConnectionReply2,
            id::NO_FREE_INCOMING_CONNECTIONS => PacketType::NoFreeIncomingConnections,
            id::INCOMPATIBLE_PROTOCOL_VERSION => PacketType::IncompatibleProtocolVersion,
            id::ACK => PacketType::Ack,
            id::NACK => PacketType::Nack,
            id::FRAME_SET_MIN..=id::FRAME_SET_MAX => PacketType::FrameSet,
            other => PacketType::Unknown(other),
        }
    }

    /// True for packets that are valid without an established connection
    pub fn is_offline(self) -> bool {
        !matches!(
            self,
            PacketType::Ack | PacketType::Nack | PacketType::FrameSet | PacketType::Unknown(_)
        )
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Unknown(value) => write!(f, "Unknown(0x{:02x})", value),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Connection-less control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflinePacket {
    /// `open_connections` is set for the 0x02 variant
    UnconnectedPing {
        ping: UnconnectedPing,
        open_connections: bool,
    },
    UnconnectedPong(UnconnectedPong),
    OpenConnectionRequest1(OpenConnectionRequest1),
    OpenConnectionReply1(OpenConnectionReply1),
    OpenConnectionRequest2(OpenConnectionRequest2),
    OpenConnectionReply2(OpenConnectionReply2),
    NoFreeIncomingConnections(NoFreeIncomingConnections),
    IncompatibleProtocolVersion(IncompatibleProtocolVersion),
}

impl OfflinePacket {
    pub fn to_bytes(&self) -> BytesMut {
        match self {
            OfflinePacket::UnconnectedPing {
                ping,
                open_connections,
            } => ping.to_bytes(*open_connections),
            OfflinePacket::UnconnectedPong(p) => p.to_bytes(),
            OfflinePacket::OpenConnectionRequest1(p) => p.to_bytes(),
            OfflinePacket::OpenConnectionReply1(p) => p.to_bytes(),
            OfflinePacket::OpenConnectionRequest2(p) => p.to_bytes(),
            OfflinePacket::OpenConnectionReply2(p) => p.to_bytes(),
            OfflinePacket::NoFreeIncomingConnections(p) => p.to_bytes(),
            OfflinePacket::IncompatibleProtocolVersion(p) => p.to_bytes(),
        }
    }
}

/// Any datagram this protocol understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Offline(OfflinePacket),
    Ack(AckPacket),
    Nack(AckPacket),
    FrameSet(FrameSet),
    /// Identifier outside the catalog; the payload is kept for logging
    Unknown(u8, Bytes),
}

impl Packet {
    /// Get the packet type
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Offline(OfflinePacket::UnconnectedPing {
                open_connections, ..
            }) => {
                if *open_connections {
                    PacketType::UnconnectedPingOpenConnections
                } else {
                    PacketType::UnconnectedPing
                }
            }
            Packet::Offline(OfflinePacket::UnconnectedPong(_)) => PacketType::UnconnectedPong,
            Packet::Offline(OfflinePacket::OpenConnectionRequest1(_)) => {
                PacketType::OpenConnectionRequest1
            }
            Packet::Offline(OfflinePacket::OpenConnectionReply1(_)) => {
                PacketType::OpenConnectionReply1
            }
            Packet::Offline(OfflinePacket::OpenConnectionRequest2(_)) => {
                PacketType::OpenConnectionRequest2
            }
            Packet::Offline(OfflinePacket::OpenConnectionReply2(_)) => {
                PacketType::OpenConnectionReply2
            }
            Packet::Offline(OfflinePacket::NoFreeIncomingConnections(_)) => {
                PacketType::NoFreeIncomingConnections
            }
            Packet::Offline(OfflinePacket::IncompatibleProtocolVersion(_)) => {
                PacketType::IncompatibleProtocolVersion
            }
            Packet::Ack(_) => PacketType::Ack,
            Packet::Nack(_) => PacketType::Nack,
            Packet::FrameSet(_) => PacketType::FrameSet,
            Packet::Unknown(value, _) => PacketType::Unknown(*value),
        }
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        match self {
            Packet::Offline(p) => p.to_bytes(),
            Packet::Ack(p) => p.to_bytes(id::ACK),
            Packet::Nack(p) => p.to_bytes(id::NACK),
            Packet::FrameSet(p) => p.to_bytes(),
            Packet::Unknown(value, payload) => {
                let mut buf = BytesMut::with_capacity(1 + payload.len());
                buf.extend_from_slice(&[*value]);
                buf.extend_from_slice(payload);
                buf
            }
        }
    }

    /// Parse a datagram, dispatching on its first byte
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let first = *bytes.first().ok_or(PacketError::InsufficientData {
            expected: 1,
            actual: 0,
        })?;

        let packet = match PacketType::from_id(first) {
            PacketType::UnconnectedPing => Packet::Offline(OfflinePacket::UnconnectedPing {
                ping: UnconnectedPing::from_bytes(bytes)?,
                open_connections: false,
            }),
            PacketType::UnconnectedPingOpenConnections => {
                Packet::Offline(OfflinePacket::UnconnectedPing {
                    ping: UnconnectedPing::from_bytes(bytes)?,
                    open_connections: true,
                })
            }
            PacketType::UnconnectedPong => Packet::Offline(OfflinePacket::UnconnectedPong(
                UnconnectedPong::from_bytes(bytes)?,
            )),
            PacketType::OpenConnectionRequest1 => Packet::Offline(
                OfflinePacket::OpenConnectionRequest1(OpenConnectionRequest1::from_bytes(bytes)?),
            ),
            PacketType::OpenConnectionReply1 => Packet::Offline(
                OfflinePacket::OpenConnectionReply1(OpenConnectionReply1::from_bytes(bytes)?),
            ),
            PacketType::OpenConnectionRequest2 => Packet::Offline(
                OfflinePacket::OpenConnectionRequest2(OpenConnectionRequest2::from_bytes(bytes)?),
            ),
            PacketType::OpenConnectionReply2 => Packet::Offline(
                OfflinePacket::OpenConnectionReply2(OpenConnectionReply2::from_bytes(bytes)?),
            ),
            PacketType::NoFreeIncomingConnections => {
                Packet::Offline(OfflinePacket::NoFreeIncomingConnections(
                    NoFreeIncomingConnections::from_bytes(bytes)?,
                ))
            }
            PacketType::IncompatibleProtocolVersion => {
                Packet::Offline(OfflinePacket::IncompatibleProtocolVersion(
                    IncompatibleProtocolVersion::from_bytes(bytes)?,
                ))
            }
            PacketType::Ack => Packet::Ack(AckPacket::from_bytes(bytes)?),
            PacketType::Nack => Packet::Nack(AckPacket::from_bytes(bytes)?),
            PacketType::FrameSet => Packet::FrameSet(FrameSet::from_bytes(bytes)?),
            PacketType::Unknown(value) => {
                Packet::Unknown(value, Bytes::copy_from_slice(&bytes[1..]))
            }
        };

        Ok(packet)
    }
}

impl From<OfflinePacket> for Packet {
    fn from(packet: OfflinePacket) -> Self {
        Packet::Offline(packet)
    }
}

/// Packet parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Wrong packet type: expected 0x{expected:02x}, got 0x{actual:02x}")]
    WrongPacketType { expected: u8, actual: u8 },

    #[error("Offline magic mismatch")]
    InvalidMagic,

    #[error("Invalid address family: {0}")]
    InvalidAddressFamily(u8),

    #[error("Invalid UTF-8 string")]
    InvalidString,

    #[error("Invalid reliability: {0}")]
    InvalidReliability(u8),

    #[error("Invalid split: index {index} of {count}")]
    InvalidSplit { index: u32, count: u32 },

    #[error("Empty frame-set")]
    EmptyFrameSet,

    #[error("MTU out of range: {0}")]
    InvalidMtu(u16),
}

/// Fail unless the first byte of `bytes` is `expected`
pub(crate) fn expect_id(bytes: &[u8], expected: u8) -> Result<(), PacketError> {
    match bytes.first() {
        Some(&actual) if actual == expected => Ok(()),
        Some(&actual) => Err(PacketError::WrongPacketType { expected, actual }),
        None => Err(PacketError::InsufficientData {
            expected: 1,
            actual: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_set_range() {
        for value in id::FRAME_SET_MIN..=id::FRAME_SET_MAX {
            assert_eq!(PacketType::from_id(value), PacketType::FrameSet);
        }
        assert_eq!(PacketType::from_id(0x90), PacketType::Unknown(0x90));
        assert_eq!(PacketType::from_id(id::ACK), PacketType::Ack);
        assert_eq!(PacketType::from_id(id::NACK), PacketType::Nack);
    }

    #[test]
    fn test_offline_classification() {
        assert!(PacketType::UnconnectedPing.is_offline());
        assert!(PacketType::OpenConnectionRequest2.is_offline());
        assert!(!PacketType::Ack.is_offline());
        assert!(!PacketType::FrameSet.is_offline());
        assert!(!PacketType::Unknown(0x42).is_offline());
    }

    #[test]
    fn test_empty_datagram() {
        assert!(matches!(
            Packet::from_bytes(&[]),
            Err(PacketError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_unknown_identifier_is_kept() {
        let packet = Packet::from_bytes(&[0x42, 1, 2, 3]).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Unknown(0x42));
        assert_eq!(&packet.to_bytes()[..], &[0x42u8, 1, 2, 3]);
    }

    #[test]
    fn test_wrong_id() {
        assert_eq!(
            expect_id(&[0x06], id::OPEN_CONNECTION_REQUEST_1),
            Err(PacketError::WrongPacketType {
                expected: 0x05,
                actual: 0x06
            })
        );
    }
}
