//! Connection-less Handshake Packets
//!
//! Ping/pong and the two-step open-connection exchange. None of these
//! packets need per-peer state on the server: each request is answered from
//! the server's configuration alone, so peers may retry any step safely.

use crate::codec::{address_size, RakBuf, RakBufMut, MAGIC};
use crate::packet::{expect_id, id, PacketError, MIN_MTU, UDP_HEADER_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use std::net::SocketAddr;

/// Protocol version spoken by current RakNet peers
pub const PROTOCOL_VERSION: u8 = 11;

/// Unconnected ping (0x01 / 0x02)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconnectedPing {
    /// Sender's clock, echoed back in the pong
    pub time: u64,
    pub client_guid: u64,
}

impl UnconnectedPing {
    pub fn to_bytes(&self, open_connections: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(33);
        buf.put_u8(if open_connections {
            id::UNCONNECTED_PING_OPEN_CONNECTIONS
        } else {
            id::UNCONNECTED_PING
        });
        buf.put_u64(self.time);
        buf.put_magic();
        buf.put_u64(self.client_guid);
        buf
    }

    /// Accepts either ping identifier; some clients omit the trailing GUID
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut buf = bytes;
        let packet_id = buf.read_u8()?;
        if packet_id != id::UNCONNECTED_PING && packet_id != id::UNCONNECTED_PING_OPEN_CONNECTIONS
        {
            return Err(PacketError::WrongPacketType {
                expected: id::UNCONNECTED_PING,
                actual: packet_id,
            });
        }
        let time = buf.read_u64()?;
        buf.read_magic()?;
        let client_guid = if buf.remaining() >= 8 {
            buf.get_u64()
        } else {
            0
        };
        Ok(UnconnectedPing { time, client_guid })
    }
}

/// Unconnected pong (0x1c)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPong {
    pub time: u64,
    pub server_guid: u64,
    /// Free-form status string ("MOTD")
    pub status: String,
}

impl UnconnectedPong {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(35 + self.status.len());
        buf.put_u8(id::UNCONNECTED_PONG);
        buf.put_u64(self.time);
        buf.put_u64(self.server_guid);
        buf.put_magic();
        buf.put_string(&self.status);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        expect_id(bytes, id::UNCONNECTED_PONG)?;
        let mut buf = &bytes[1..];
        let time = buf.read_u64()?;
        let server_guid = buf.read_u64()?;
        buf.read_magic()?;
        let status = buf.read_string()?;
        Ok(UnconnectedPong {
            time,
            server_guid,
            status,
        })
    }
}

/// Open connection request 1 (0x05)
///
/// The request is zero-padded so that the whole datagram probes the path
/// MTU; the probed size is the datagram length plus the IP/UDP headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest1 {
    pub protocol_version: u8,
    pub mtu: u16,
}

impl OpenConnectionRequest1 {
    const FIXED_SIZE: usize = 1 + MAGIC.len() + 1;

    pub fn to_bytes(&self) -> BytesMut {
        let total = (self.mtu as usize)
            .saturating_sub(UDP_HEADER_SIZE)
            .max(Self::FIXED_SIZE);
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(id::OPEN_CONNECTION_REQUEST_1);
        buf.put_magic();
        buf.put_u8(self.protocol_version);
        buf.put_bytes(0, total - Self::FIXED_SIZE);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        expect_id(bytes, id::OPEN_CONNECTION_REQUEST_1)?;
        let mut buf = &bytes[1..];
        buf.read_magic()?;
        let protocol_version = buf.read_u8()?;
        let mtu = (bytes.len() + UDP_HEADER_SIZE).min(u16::MAX as usize) as u16;
        Ok(OpenConnectionRequest1 {
            protocol_version,
            mtu,
        })
    }
}

/// Open connection reply 1 (0x06)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply1 {
    pub server_guid: u64,
    /// Always false: the transport carries no security layer
    pub use_security: bool,
    pub mtu: u16,
}

impl OpenConnectionReply1 {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(28);
        buf.put_u8(id::OPEN_CONNECTION_REPLY_1);
        buf.put_magic();
        buf.put_u64(self.server_guid);
        buf.put_bool(self.use_security);
        buf.put_u16(self.mtu);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        expect_id(bytes, id::OPEN_CONNECTION_REPLY_1)?;
        let mut buf = &bytes[1..];
        buf.read_magic()?;
        Ok(OpenConnectionReply1 {
            server_guid: buf.read_u64()?,
            use_security: buf.read_bool()?,
            mtu: buf.read_u16()?,
        })
    }
}

/// Open connection request 2 (0x07)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionRequest2 {
    /// Server address as the client sees it
    pub server_address: SocketAddr,
    pub mtu: u16,
    pub client_guid: u64,
}

impl OpenConnectionRequest2 {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(27 + address_size(&self.server_address));
        buf.put_u8(id::OPEN_CONNECTION_REQUEST_2);
        buf.put_magic();
        buf.put_address(&self.server_address);
        buf.put_u16(self.mtu);
        buf.put_u64(self.client_guid);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        expect_id(bytes, id::OPEN_CONNECTION_REQUEST_2)?;
        let mut buf = &bytes[1..];
        buf.read_magic()?;
        let server_address = buf.read_address()?;
        let mtu = buf.read_u16()?;
        let client_guid = buf.read_u64()?;
        if mtu < MIN_MTU {
            return Err(PacketError::InvalidMtu(mtu));
        }
        Ok(OpenConnectionRequest2 {
            server_address,
            mtu,
            client_guid,
        })
    }
}

/// Open connection reply 2 (0x08)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenConnectionReply2 {
    pub server_guid: u64,
    /// Client address as the server sees it
    pub client_address: SocketAddr,
    pub mtu: u16,
    /// Always false: the transport carries no encryption
    pub encryption: bool,
}

impl OpenConnectionReply2 {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(28 + address_size(&self.client_address));
        buf.put_u8(id::OPEN_CONNECTION_REPLY_2);
        buf.put_magic();
        buf.put_u64(self.server_guid);
        buf.put_address(&self.client_address);
        buf.put_u16(self.mtu);
        buf.put_bool(self.encryption);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        expect_id(bytes, id::OPEN_CONNECTION_REPLY_2)?;
        let mut buf = &bytes[1..];
        buf.read_magic()?;
        Ok(OpenConnectionReply2 {
            server_guid: buf.read_u64()?,
            client_address: buf.read_address()?,
            mtu: buf.read_u16()?,
            encryption: buf.read_bool()?,
        })
    }
}

/// Sent instead of reply 2 when the server has no free connection slots (0x14)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoFreeIncomingConnections {
    pub server_guid: u64,
}

impl NoFreeIncomingConnections {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(25);
        buf.put_u8(id::NO_FREE_INCOMING_CONNECTIONS);
        buf.put_magic();
        buf.put_u64(self.server_guid);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        expect_id(bytes, id::NO_FREE_INCOMING_CONNECTIONS)?;
        let mut buf = &bytes[1..];
        buf.read_magic()?;
        Ok(NoFreeIncomingConnections {
            server_guid: buf.read_u64()?,
        })
    }
}

/// Incompatible protocol version (0x19)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncompatibleProtocolVersion {
    /// The version this server speaks
    pub protocol_version: u8,
    pub server_guid: u64,
}

impl IncompatibleProtocolVersion {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(26);
        buf.put_u8(id::INCOMPATIBLE_PROTOCOL_VERSION);
        buf.put_u8(self.protocol_version);
        buf.put_magic();
        buf.put_u64(self.server_guid);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        expect_id(bytes, id::INCOMPATIBLE_PROTOCOL_VERSION)?;
        let mut buf = &bytes[1..];
        let protocol_version = buf.read_u8()?;
        buf.read_magic()?;
        Ok(IncompatibleProtocolVersion {
            protocol_version,
            server_guid: buf.read_u64()?,
        })
    }
}

/// Clamp a requested MTU into the range this side accepts
pub fn negotiate_mtu(requested: u16, max_mtu: u16) -> u16 {
    requested.clamp(MIN_MTU, max_mtu.max(MIN_MTU))
}
