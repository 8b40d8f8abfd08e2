//! Configuration file support for the RakNet CLI tools

use rak_protocol::{ConnectionConfig, MAX_MTU, PROTOCOL_VERSION};
use rak_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Local bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Server GUID; random when absent
    pub guid: Option<u64>,
    /// Status string returned to pings
    #[serde(default = "default_motd")]
    pub motd: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_mtu")]
    pub max_mtu: u16,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    /// Maintenance tick in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Send every received payload back to its sender
    #[serde(default)]
    pub echo: bool,
    /// Statistics interval in seconds, 0 disables
    #[serde(default)]
    pub stats_interval_secs: u64,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], rak_server::config::DEFAULT_PORT))
}

fn default_motd() -> String {
    "RakNet server".to_string()
}

fn default_max_connections() -> usize {
    64
}

fn default_max_mtu() -> u16 {
    MAX_MTU
}

fn default_protocol_version() -> u8 {
    PROTOCOL_VERSION
}

fn default_tick_interval() -> u64 {
    10
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            bind: default_bind(),
            guid: None,
            motd: default_motd(),
            max_connections: default_max_connections(),
            max_mtu: default_max_mtu(),
            protocol_version: default_protocol_version(),
            tick_interval_ms: default_tick_interval(),
            echo: false,
            stats_interval_secs: 0,
        }
    }
}

/// Per-connection reliability settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_resend_interval")]
    pub resend_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_split_timeout")]
    pub split_timeout_ms: u64,
    #[serde(default = "default_nack_interval")]
    pub nack_interval_ms: u64,
    #[serde(default = "default_max_nack_count")]
    pub max_nack_count: u32,
    #[serde(default = "default_max_split_count")]
    pub max_split_count: u32,
    #[serde(default = "default_max_concurrent_splits")]
    pub max_concurrent_splits: usize,
    #[serde(default = "default_reorder_window")]
    pub reorder_window: u32,
    #[serde(default = "default_resend_capacity")]
    pub resend_capacity: usize,
}

fn default_resend_interval() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    10
}

fn default_timeout() -> u64 {
    10_000
}

fn default_split_timeout() -> u64 {
    30_000
}

fn default_nack_interval() -> u64 {
    100
}

fn default_max_nack_count() -> u32 {
    3
}

fn default_max_split_count() -> u32 {
    1024
}

fn default_max_concurrent_splits() -> usize {
    64
}

fn default_reorder_window() -> u32 {
    2048
}

fn default_resend_capacity() -> usize {
    8192
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        ReliabilityConfig {
            resend_interval_ms: default_resend_interval(),
            max_retries: default_max_retries(),
            timeout_ms: default_timeout(),
            split_timeout_ms: default_split_timeout(),
            nack_interval_ms: default_nack_interval(),
            max_nack_count: default_max_nack_count(),
            max_split_count: default_max_split_count(),
            max_concurrent_splits: default_max_concurrent_splits(),
            reorder_window: default_reorder_window(),
            resend_capacity: default_resend_capacity(),
        }
    }
}

impl ReliabilityConfig {
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            resend_interval: Duration::from_millis(self.resend_interval_ms),
            max_retries: self.max_retries,
            timeout: Duration::from_millis(self.timeout_ms),
            split_timeout: Duration::from_millis(self.split_timeout_ms),
            nack_interval: Duration::from_millis(self.nack_interval_ms),
            max_nack_count: self.max_nack_count,
            max_split_count: self.max_split_count,
            max_concurrent_splits: self.max_concurrent_splits,
            reorder_window: self.reorder_window,
            resend_capacity: self.resend_capacity,
            ..ConnectionConfig::default()
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example configuration with every field spelled out
    pub fn example() -> Self {
        Config {
            server: ServerSection {
                guid: Some(0x5241_4b4e_4554_0001),
                motd: "My RakNet server".to_string(),
                stats_interval_secs: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Build the server configuration, checking the values on the way
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let server = &self.server;
        let mut config = ServerConfig::new(server.bind)
            .with_motd(server.motd.clone())
            .with_max_connections(server.max_connections)
            .with_connection_config(self.reliability.to_connection_config())
            .with_max_mtu(server.max_mtu)
            .with_protocol_version(server.protocol_version)
            .with_tick_interval(Duration::from_millis(server.tick_interval_ms));
        if let Some(guid) = server.guid {
            config = config.with_guid(guid);
        }

        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Get statistics interval, if enabled
    pub fn stats_interval(&self) -> Option<Duration> {
        match self.server.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
