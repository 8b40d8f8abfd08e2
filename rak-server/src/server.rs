//! Blocking server loop
//!
//! [`Server`] owns the socket and a [`Dispatcher`] and runs both on one
//! thread. Receiving blocks for at most the time left until the next tick.
//! Other threads interact through a [`ServerHandle`]: commands and events
//! travel over channels, statistics are published behind a lock after every
//! tick.

use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, ServerEvent, ServerStats};
use crate::error::ServerError;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use rak_io::{RakSocket, Timer, MAX_DATAGRAM_SIZE};
use rak_protocol::Reliability;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Request from a [`ServerHandle`] to the server loop
#[derive(Debug, Clone)]
pub enum Command {
    Send {
        address: SocketAddr,
        payload: Bytes,
        reliability: Reliability,
        channel: u8,
    },
    Disconnect {
        address: SocketAddr,
    },
}

/// Server loop state
pub struct Server {
    socket: RakSocket,
    dispatcher: Dispatcher,
    timer: Timer,
    commands: Receiver<Command>,
    events: Sender<ServerEvent>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<RwLock<ServerStats>>,
    events_dropped: u64,
}

/// Cloneable access to a running [`Server`]
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    commands: Sender<Command>,
    events: Receiver<ServerEvent>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<RwLock<ServerStats>>,
}

impl Server {
    /// Bind the socket and prepare the loop
    ///
    /// Failing to bind is the only fatal error of a server.
    pub fn bind(config: ServerConfig) -> Result<(Server, ServerHandle), ServerError> {
        config.validate()?;

        let socket = RakSocket::bind(config.bind_addr)?;
        if let Some(size) = config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = config.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        let local_addr = socket.local_addr()?;

        let (command_tx, command_rx) = channel::unbounded();
        let (event_tx, event_rx) = channel::bounded(config.event_queue_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(RwLock::new(ServerStats::default()));

        info!(
            %local_addr,
            guid = config.guid,
            max_connections = config.max_connections,
            "Server listening"
        );

        let server = Server {
            socket,
            timer: Timer::new(config.tick_interval, Instant::now()),
            dispatcher: Dispatcher::new(config),
            commands: command_rx,
            events: event_tx,
            shutdown: shutdown.clone(),
            stats: stats.clone(),
            events_dropped: 0,
        };

        let handle = ServerHandle {
            local_addr,
            commands: command_tx,
            events: event_rx,
            shutdown,
            stats,
        };

        Ok((server, handle))
    }

    /// Bind and run the loop on a new thread
    pub fn spawn(
        config: ServerConfig,
    ) -> Result<(ServerHandle, JoinHandle<Result<(), ServerError>>), ServerError> {
        let (server, handle) = Server::bind(config)?;
        let thread = thread::Builder::new()
            .name("raknet-server".into())
            .spawn(move || server.run())
            .map_err(|e| ServerError::Socket(e.into()))?;
        Ok((handle, thread))
    }

    /// Run until the shutdown flag is set
    pub fn run(mut self) -> Result<(), ServerError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        while !self.shutdown.load(Ordering::Acquire) {
            let wait = self.timer.time_until_expiration(Instant::now());
            self.socket.set_read_timeout(wait)?;

            match self.socket.recv_from(&mut buf) {
                Ok((len, source)) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    self.dispatcher
                        .handle_datagram(&buf[..len], source, Instant::now());
                }
                Err(e) if e.is_timeout() => {}
                Err(e) => {
                    // ICMP errors from earlier sends surface here on some platforms
                    debug!(error = %e, "Receive failed");
                }
            }

            let now = Instant::now();
            self.process_commands(now);
            let fired = self.timer.try_fire(now);
            if fired {
                self.dispatcher.tick(now);
            }
            self.flush();
            if fired {
                self.publish_stats();
            }
        }

        self.publish_stats();
        info!("Server stopped");
        Ok(())
    }

    fn process_commands(&mut self, now: Instant) {
        while let Ok(command) = self.commands.try_recv() {
            let result = match command {
                Command::Send {
                    address,
                    payload,
                    reliability,
                    channel,
                } => self
                    .dispatcher
                    .send(address, payload, reliability, channel, now),
                Command::Disconnect { address } => self.dispatcher.disconnect(address, now),
            };
            if let Err(e) = result {
                debug!(error = %e, "Command failed");
            }
        }
    }

    fn flush(&mut self) {
        while let Some(transmit) = self.dispatcher.poll_transmit() {
            if let Err(e) = self
                .socket
                .send_to(&transmit.payload, transmit.destination)
            {
                warn!(destination = %transmit.destination, error = %e, "Send failed");
            }
        }

        while let Some(event) = self.dispatcher.poll_event() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(?event, "Event queue full, dropping event");
                    self.events_dropped += 1;
                }
                // Nobody listening is not an error
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    fn publish_stats(&self) {
        *self.stats.write() = ServerStats {
            events_dropped: self.events_dropped,
            ..self.dispatcher.stats()
        };
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a payload for a connected peer
    pub fn send(
        &self,
        address: SocketAddr,
        payload: Bytes,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), ServerError> {
        self.command(Command::Send {
            address,
            payload,
            reliability,
            channel,
        })
    }

    /// Close a peer's connection
    pub fn disconnect(&self, address: SocketAddr) -> Result<(), ServerError> {
        self.command(Command::Disconnect { address })
    }

    fn command(&self, command: Command) -> Result<(), ServerError> {
        if self.is_shutdown() {
            return Err(ServerError::Shutdown);
        }
        self.commands
            .send(command)
            .map_err(|_| ServerError::Shutdown)
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<Option<ServerEvent>, ServerError> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ServerError::Shutdown),
        }
    }

    pub fn try_event(&self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// Statistics as of the last tick
    pub fn stats(&self) -> ServerStats {
        self.stats.read().clone()
    }

    /// Ask the loop to stop; it exits within one tick
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rak_protocol::{OfflinePacket, OpenConnectionRequest2, Packet, UnconnectedPing};

    fn config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_guid(7)
    }

    #[test]
    fn test_bind_and_shutdown() {
        let (handle, thread) = Server::spawn(config()).unwrap();
        assert!(handle.local_addr().port() > 0);

        handle.shutdown();
        thread.join().unwrap().unwrap();
        assert!(handle.is_shutdown());
        assert!(matches!(
            handle.disconnect(handle.local_addr()),
            Err(ServerError::Shutdown)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Server::bind(config().with_max_connections(0));
        assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn test_answers_ping() {
        let (handle, thread) = Server::spawn(config().with_motd("pong test")).unwrap();

        let client = RakSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        client.set_read_timeout(Duration::from_secs(2)).unwrap();
        let ping = UnconnectedPing {
            time: 99,
            client_guid: 1,
        };
        client
            .send_to(&ping.to_bytes(false), handle.local_addr())
            .unwrap();

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(from, handle.local_addr());
        match Packet::from_bytes(&buf[..len]).unwrap() {
            Packet::Offline(OfflinePacket::UnconnectedPong(pong)) => {
                assert_eq!(pong.time, 99);
                assert_eq!(pong.server_guid, 7);
                assert_eq!(pong.status, "pong test");
            }
            other => panic!("unexpected packet {:?}", other),
        }

        handle.shutdown();
        thread.join().unwrap().unwrap();
        assert_eq!(handle.stats().pings_answered, 1);
    }

    #[test]
    fn test_full_event_queue_drops_events() {
        let (handle, thread) = Server::spawn(config().with_event_queue_capacity(1)).unwrap();
        let server = handle.local_addr();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        // Two peers connect while nobody drains events
        for guid in 1..=2 {
            let client = RakSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            client.set_read_timeout(Duration::from_secs(2)).unwrap();
            let request = OpenConnectionRequest2 {
                server_address: server,
                mtu: 1200,
                client_guid: guid,
            };
            client.send_to(&request.to_bytes(), server).unwrap();
            client.recv_from(&mut buf).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.stats().handshakes_completed < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let stats = handle.stats();
        assert_eq!(stats.handshakes_completed, 2);
        assert_eq!(stats.events_dropped, 1);
        assert!(matches!(
            handle.try_event(),
            Some(ServerEvent::Connected { guid: 1, .. })
        ));
        assert!(handle.try_event().is_none());

        handle.shutdown();
        thread.join().unwrap().unwrap();
    }
}
