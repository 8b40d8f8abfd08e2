//! Bounds-checked field codec
//!
//! Extension traits over [`bytes::Buf`] / [`bytes::BufMut`] for the field
//! shapes that recur across packet types: 24-bit little-endian counters, the
//! offline magic marker, length-prefixed strings and encoded socket addresses.
//! Every `read_*` checks the remaining length first so a truncated datagram
//! yields [`PacketError::InsufficientData`] instead of a panic.

use crate::packet::PacketError;
use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

/// Marker carried by every connection-less packet
pub const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

/// `AF_INET6` as written by the reference implementation (little-endian u16)
const AF_INET6: u16 = 23;

/// Encoded size of an IPv4 address (version + 4 bytes + port)
pub const IPV4_ADDRESS_SIZE: usize = 7;

/// Encoded size of an IPv6 address (version + family + port + flow + 16 bytes + scope)
pub const IPV6_ADDRESS_SIZE: usize = 29;

macro_rules! read_impl {
    ($reader:ident, $ty:ty, $getter:ident) => {
        fn $reader(&mut self) -> Result<$ty, PacketError> {
            self.ensure(std::mem::size_of::<$ty>())?;
            Ok(self.$getter())
        }
    };
}

/// Checked reads of protocol fields
pub trait RakBuf: Buf {
    /// Fail unless at least `needed` bytes remain
    fn ensure(&self, needed: usize) -> Result<(), PacketError> {
        if self.remaining() < needed {
            return Err(PacketError::InsufficientData {
                expected: needed,
                actual: self.remaining(),
            });
        }
        Ok(())
    }

    read_impl!(read_u8, u8, get_u8);
    read_impl!(read_u16, u16, get_u16);
    read_impl!(read_u16_le, u16, get_u16_le);
    read_impl!(read_u32, u32, get_u32);
    read_impl!(read_u64, u64, get_u64);

    fn read_bool(&mut self) -> Result<bool, PacketError> {
        Ok(self.read_u8()? != 0)
    }

    /// 24-bit little-endian counter
    fn read_seq(&mut self) -> Result<SeqNumber, PacketError> {
        self.ensure(3)?;
        let raw = self.get_uint_le(3) as u32;
        Ok(SeqNumber::new_unchecked(raw))
    }

    fn read_magic(&mut self) -> Result<(), PacketError> {
        self.ensure(MAGIC.len())?;
        let mut magic = [0u8; 16];
        self.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(PacketError::InvalidMagic);
        }
        Ok(())
    }

    /// u16 length prefix followed by UTF-8 bytes
    fn read_string(&mut self) -> Result<String, PacketError> {
        let len = self.read_u16()? as usize;
        self.ensure(len)?;
        let mut raw = vec![0u8; len];
        self.copy_to_slice(&mut raw);
        String::from_utf8(raw).map_err(|_| PacketError::InvalidString)
    }

    fn read_address(&mut self) -> Result<SocketAddr, PacketError> {
        match self.read_u8()? {
            4 => {
                self.ensure(6)?;
                let octets = [
                    !self.get_u8(),
                    !self.get_u8(),
                    !self.get_u8(),
                    !self.get_u8(),
                ];
                let port = self.get_u16();
                Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            6 => {
                self.ensure(IPV6_ADDRESS_SIZE - 1)?;
                let family = self.get_u16_le();
                if family != AF_INET6 {
                    return Err(PacketError::InvalidAddressFamily(family as u8));
                }
                let port = self.get_u16();
                let flow_info = self.get_u32();
                let mut octets = [0u8; 16];
                self.copy_to_slice(&mut octets);
                let scope_id = self.get_u32();
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    flow_info,
                    scope_id,
                )))
            }
            other => Err(PacketError::InvalidAddressFamily(other)),
        }
    }
}

impl<T: Buf> RakBuf for T {}

/// Writes of protocol fields
pub trait RakBufMut: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_seq(&mut self, seq: SeqNumber) {
        self.put_uint_le(seq.as_raw() as u64, 3);
    }

    fn put_magic(&mut self) {
        self.put_slice(&MAGIC);
    }

    /// Strings longer than u16::MAX bytes are truncated
    fn put_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        let len = bytes.len().min(u16::MAX as usize);
        self.put_u16(len as u16);
        self.put_slice(&bytes[..len]);
    }

    fn put_address(&mut self, addr: &SocketAddr) {
        match addr {
            SocketAddr::V4(v4) => {
                self.put_u8(4);
                for octet in v4.ip().octets() {
                    self.put_u8(!octet);
                }
                self.put_u16(v4.port());
            }
            SocketAddr::V6(v6) => {
                self.put_u8(6);
                self.put_u16_le(AF_INET6);
                self.put_u16(v6.port());
                self.put_u32(v6.flowinfo());
                self.put_slice(&v6.ip().octets());
                self.put_u32(v6.scope_id());
            }
        }
    }
}

impl<T: BufMut> RakBufMut for T {}

/// Encoded length of an address
pub fn address_size(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => IPV4_ADDRESS_SIZE,
        SocketAddr::V6(_) => IPV6_ADDRESS_SIZE,
    }
}
