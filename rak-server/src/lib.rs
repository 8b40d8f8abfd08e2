//! RakNet Server
//!
//! Session registry, datagram dispatcher and the blocking server loop. The
//! [`Dispatcher`] is sans-I/O and can be driven directly; [`Server`] owns a
//! UDP socket and drives a dispatcher on a single thread, talking to the
//! rest of the program through a [`ServerHandle`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use dispatcher::{DisconnectReason, Dispatcher, ServerEvent, ServerStats, Transmit};
pub use error::ServerError;
pub use registry::{RegistryError, SessionRegistry};
pub use server::{Command, Server, ServerHandle};
