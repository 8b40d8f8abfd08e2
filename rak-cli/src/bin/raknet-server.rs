//! RakNet Server - standalone reliable UDP server
//!
//! Answers pings, accepts connections and logs their traffic. With `--echo`
//! every payload is sent back to the peer it came from.
//!
//! Examples:
//!   raknet-server --bind 0.0.0.0:19132 --motd "Test server"
//!   raknet-server --config server.toml --stats 5
//!   raknet-server --example-config > server.toml

use clap::Parser;
use rak_cli::config::Config;
use rak_cli::stats::{display_compact_stats, display_server_stats};
use raknet::{Reliability, Server, ServerEvent, ServerHandle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "raknet-server")]
#[command(about = "RakNet-compatible reliable UDP server", long_about = None)]
struct Args {
    /// TOML configuration file; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Server GUID advertised to clients (random by default)
    #[arg(long)]
    guid: Option<u64>,

    /// Status string returned to pings
    #[arg(long)]
    motd: Option<String>,

    /// Maximum number of simultaneous connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Send every received payload back to its sender
    #[arg(long)]
    echo: bool,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(guid) = self.guid {
            config.server.guid = Some(guid);
        }
        if let Some(motd) = &self.motd {
            config.server.motd = motd.clone();
        }
        if let Some(max) = self.max_connections {
            config.server.max_connections = max;
        }
        if self.echo {
            config.server.echo = true;
        }
        if let Some(secs) = self.stats {
            config.server.stats_interval_secs = secs;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&Config::example())?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    args.apply(&mut config);

    // Initialize logging
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("RakNet server starting...");

    let server_config = config.to_server_config()?;
    let (handle, thread) = Server::spawn(server_config)?;
    tracing::info!("Listening on: {}", handle.local_addr());
    if config.server.echo {
        tracing::info!("Echo mode enabled");
    }

    let started = Instant::now();
    let mut last_stats = started;
    let stats_interval = config.stats_interval();

    while !thread.is_finished() {
        match handle.recv_event_timeout(Duration::from_millis(100)) {
            Ok(Some(event)) => handle_event(&handle, event, config.server.echo),
            Ok(None) => {}
            Err(_) => break,
        }

        if let Some(interval) = stats_interval {
            if last_stats.elapsed() >= interval {
                if args.verbose {
                    display_server_stats(&handle.stats(), started.elapsed());
                } else {
                    display_compact_stats(&handle.stats(), started.elapsed());
                }
                last_stats = Instant::now();
            }
        }
    }

    thread
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;

    display_server_stats(&handle.stats(), started.elapsed());
    Ok(())
}

fn handle_event(handle: &ServerHandle, event: ServerEvent, echo: bool) {
    match event {
        ServerEvent::Connected { address, guid, mtu } => {
            tracing::info!("Client connected: {} (guid {:#018x}, mtu {})", address, guid, mtu);
        }
        ServerEvent::Payload { address, payload } => {
            tracing::debug!("{} bytes from {}", payload.len(), address);
            if echo {
                if let Err(e) = handle.send(address, payload, Reliability::ReliableOrdered, 0) {
                    tracing::warn!("Echo to {} failed: {}", address, e);
                }
            }
        }
        ServerEvent::Disconnected { address, reason } => {
            tracing::info!("Client disconnected: {} ({:?})", address, reason);
        }
    }
}
