use crate::registry::RegistryError;
use rak_io::SocketError;
use rak_protocol::ConnectionError;
use std::net::SocketAddr;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(SocketAddr),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Server has shut down")]
    Shutdown,
}
