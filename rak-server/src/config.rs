//! Server configuration

use crate::error::ServerError;
use rak_protocol::{ConnectionConfig, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;

/// Default RakNet port
pub const DEFAULT_PORT: u16 = 19132;

/// Settings for a [`Dispatcher`](crate::Dispatcher) and [`Server`](crate::Server)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address the socket binds to
    pub bind_addr: SocketAddr,
    /// Identifier advertised in pongs and handshake replies
    pub guid: u64,
    /// Status string returned in unconnected pongs
    pub motd: String,
    /// Protocol version peers must speak
    pub protocol_version: u8,
    /// Registered connections allowed at once
    pub max_connections: usize,
    /// Period of the maintenance tick
    pub tick_interval: Duration,
    /// Socket send buffer size, if it should be changed
    pub send_buffer_size: Option<usize>,
    /// Socket receive buffer size, if it should be changed
    pub recv_buffer_size: Option<usize>,
    /// Events held for the handle before new ones are dropped
    pub event_queue_capacity: usize,
    /// Policy handed to every new connection
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            guid: rand::random(),
            motd: "RakNet server".to_string(),
            protocol_version: PROTOCOL_VERSION,
            max_connections: 64,
            tick_interval: Duration::from_millis(10),
            send_buffer_size: None,
            recv_buffer_size: None,
            event_queue_capacity: 4096,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults bound to `bind_addr`
    pub fn new(bind_addr: SocketAddr) -> Self {
        ServerConfig {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_guid(mut self, guid: u64) -> Self {
        self.guid = guid;
        self
    }

    pub fn with_motd(mut self, motd: impl Into<String>) -> Self {
        self.motd = motd.into();
        self
    }

    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Upper bound for negotiated MTUs
    pub fn with_max_mtu(mut self, mtu: u16) -> Self {
        self.connection.max_mtu = mtu;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_socket_buffers(mut self, send: usize, recv: usize) -> Self {
        self.send_buffer_size = Some(send);
        self.recv_buffer_size = Some(recv);
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Replace the connection policy, including its MTU bound
    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max connections must be positive".into(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "event queue capacity must be positive".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "tick interval must be positive".into(),
            ));
        }
        self.connection.validate().map_err(ServerError::InvalidConfig)
    }
}
