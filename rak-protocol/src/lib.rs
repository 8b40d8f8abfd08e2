//! RakNet Protocol Core Implementation
//!
//! This crate implements the RakNet transport without any I/O: the packet
//! catalog and codec, the connection-less handshake packets, frame-sets,
//! ACK/NACK ranges, and the per-connection reliability engine (resend window,
//! loss tracking, split reassembly, ordering and sequencing channels).

pub mod ack;
pub mod address;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod frame;
pub mod handshake;
pub mod loss;
pub mod ordering;
pub mod packet;
pub mod sequence;
pub mod split;

pub use ack::{AckPacket, AckRange, NackRange};
pub use address::{AddressKey, IpVersion};
pub use buffer::{BufferError, ReceiveWindow, Received, ResendWindow};
pub use codec::{RakBuf, RakBufMut, MAGIC};
pub use config::ConnectionConfig;
pub use connection::{
    Connection, ConnectionError, ConnectionState, ConnectionStats, DISCONNECT_NOTIFICATION,
};
pub use frame::{Frame, FrameSet, OrderInfo, Reliability, SplitInfo};
pub use handshake::{
    negotiate_mtu, IncompatibleProtocolVersion, NoFreeIncomingConnections, OpenConnectionReply1,
    OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2, UnconnectedPing,
    UnconnectedPong, PROTOCOL_VERSION,
};
pub use loss::ReceiverLossList;
pub use ordering::{OrderingChannel, OutgoingChannels, ORDERING_CHANNELS};
pub use packet::{OfflinePacket, Packet, PacketError, PacketType, MAX_MTU, MIN_MTU};
pub use sequence::SeqNumber;
pub use split::{SplitAssembler, SplitError};
