//! RakNet I/O and Platform Abstraction
//!
//! This crate provides the UDP socket service used by the server loop and
//! the tick timer that paces connection maintenance.

pub mod socket;
pub mod time;

pub use socket::{RakSocket, SocketError, MAX_DATAGRAM_SIZE};
pub use time::Timer;
