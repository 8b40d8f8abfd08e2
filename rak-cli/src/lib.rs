//! RakNet CLI Library
//!
//! Shared functionality for the RakNet command-line tools.

pub mod config;
pub mod stats;

pub use config::{Config, ConfigError, LogConfig, ReliabilityConfig, ServerSection};
pub use stats::{display_compact_stats, display_server_stats, format_bandwidth, format_bytes};
