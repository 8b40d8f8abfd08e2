//! RakNet - reliable UDP transport
//!
//! High-level Rust API for a RakNet-compatible server: the protocol engine,
//! the socket layer and the server loop in one crate.

pub use rak_io as io;
pub use rak_protocol as protocol;
pub use rak_server as server;

// Re-export commonly used types
pub use protocol::{
    ConnectionConfig, Packet, PacketType, Reliability, SeqNumber, DISCONNECT_NOTIFICATION,
    PROTOCOL_VERSION,
};
pub use server::{
    DisconnectReason, Server, ServerConfig, ServerError, ServerEvent, ServerHandle, ServerStats,
};
