//! Datagram dispatcher
//!
//! The dispatcher answers connection-less packets from configuration alone,
//! registers peers that complete the two-step handshake and routes every
//! other datagram to the [`Connection`] of its source address. It performs
//! no I/O: datagrams to send are drained with [`Dispatcher::poll_transmit`]
//! and application-facing events with [`Dispatcher::poll_event`].

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::SessionRegistry;
use bytes::Bytes;
use rak_protocol::{
    negotiate_mtu, AddressKey, Connection, ConnectionState, IncompatibleProtocolVersion,
    NoFreeIncomingConnections, OfflinePacket, OpenConnectionReply1, OpenConnectionReply2,
    OpenConnectionRequest1, OpenConnectionRequest2, Packet, Reliability, UnconnectedPing,
    UnconnectedPong, DISCONNECT_NOTIFICATION,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info, trace};

/// One datagram to put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub destination: SocketAddr,
    pub payload: Bytes,
}

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer went silent or stopped acknowledging
    TimedOut,
    /// Closed by [`Dispatcher::disconnect`]
    Requested,
    /// Peer sent a disconnect notification
    PeerClosed,
}

/// Something the application should know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected {
        address: SocketAddr,
        guid: u64,
        mtu: u16,
    },
    Payload {
        address: SocketAddr,
        payload: Bytes,
    },
    Disconnected {
        address: SocketAddr,
        reason: DisconnectReason,
    },
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    /// Datagrams that failed to decode
    pub malformed_dropped: u64,
    /// Connected-mode datagrams from addresses without a connection
    pub unroutable_dropped: u64,
    /// Identifiers the server does not handle
    pub unknown_dropped: u64,
    pub pings_answered: u64,
    pub handshakes_completed: u64,
    pub version_mismatches: u64,
    /// Request-2 answered with "no free incoming connections"
    pub connections_rejected: u64,
    pub payloads_delivered: u64,
    pub timeouts: u64,
    /// Events discarded because the handle did not keep up
    pub events_dropped: u64,
    /// Live connections
    pub connections: usize,
}

/// Routes datagrams between the socket and per-peer connections
pub struct Dispatcher {
    config: ServerConfig,
    registry: SessionRegistry,
    outbound: VecDeque<Transmit>,
    events: VecDeque<ServerEvent>,
    stats: ServerStats,
}

impl Dispatcher {
    pub fn new(config: ServerConfig) -> Self {
        let registry = SessionRegistry::new(config.max_connections);
        Dispatcher {
            config,
            registry,
            outbound: VecDeque::new(),
            events: VecDeque::new(),
            stats: ServerStats::default(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn connection(&self, address: SocketAddr) -> Option<&Connection> {
        self.registry.get(&AddressKey::from(address))
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.registry.len(),
            ..self.stats.clone()
        }
    }

    /// Process one datagram received from `source`
    ///
    /// Malformed datagrams are dropped without a reply and without touching
    /// any connection.
    pub fn handle_datagram(&mut self, bytes: &[u8], source: SocketAddr, now: Instant) {
        self.stats.datagrams_received += 1;
        self.stats.bytes_received += bytes.len() as u64;

        let packet = match Packet::from_bytes(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                trace!(%source, error = %err, "Dropping malformed datagram");
                self.stats.malformed_dropped += 1;
                return;
            }
        };

        match packet {
            Packet::Offline(packet) => self.handle_offline(packet, source, now),
            packet => self.handle_connected(packet, source, now),
        }
    }

    fn handle_offline(&mut self, packet: OfflinePacket, source: SocketAddr, now: Instant) {
        match packet {
            OfflinePacket::UnconnectedPing {
                ping,
                open_connections,
            } => self.handle_ping(ping, open_connections, source),
            OfflinePacket::OpenConnectionRequest1(request) => {
                self.handle_request1(request, source)
            }
            OfflinePacket::OpenConnectionRequest2(request) => {
                self.handle_request2(request, source, now)
            }
            other => {
                // Replies only ever travel server to client
                trace!(%source, packet_type = %Packet::from(other).packet_type(), "Ignoring reply packet");
                self.stats.unknown_dropped += 1;
            }
        }
    }

    fn handle_ping(&mut self, ping: UnconnectedPing, open_connections: bool, source: SocketAddr) {
        if open_connections && self.registry.is_full() {
            trace!(%source, "Ignoring open-connections ping while full");
            return;
        }

        let pong = UnconnectedPong {
            time: ping.time,
            server_guid: self.config.guid,
            status: self.config.motd.clone(),
        };
        self.stats.pings_answered += 1;
        self.send_packet(&OfflinePacket::UnconnectedPong(pong).into(), source);
    }

    fn handle_request1(&mut self, request: OpenConnectionRequest1, source: SocketAddr) {
        let reply = if request.protocol_version == self.config.protocol_version {
            let mtu = negotiate_mtu(request.mtu, self.config.connection.max_mtu);
            debug!(%source, mtu, "Open connection request 1");
            OfflinePacket::OpenConnectionReply1(OpenConnectionReply1 {
                server_guid: self.config.guid,
                use_security: false,
                mtu,
            })
        } else {
            debug!(
                %source,
                theirs = request.protocol_version,
                ours = self.config.protocol_version,
                "Protocol version mismatch"
            );
            self.stats.version_mismatches += 1;
            OfflinePacket::IncompatibleProtocolVersion(IncompatibleProtocolVersion {
                protocol_version: self.config.protocol_version,
                server_guid: self.config.guid,
            })
        };
        self.send_packet(&reply.into(), source);
    }

    fn handle_request2(&mut self, request: OpenConnectionRequest2, source: SocketAddr, now: Instant) {
        let key = AddressKey::from(source);

        // A retried request-2 is answered again with the existing MTU
        if let Some(existing) = self.registry.get(&key) {
            trace!(%source, "Repeated open connection request 2");
            let reply = self.reply2(source, existing.mtu());
            self.send_packet(&reply.into(), source);
            return;
        }

        if self.registry.is_full() {
            debug!(%source, max = self.registry.capacity(), "Refusing connection, server full");
            self.stats.connections_rejected += 1;
            let reply = OfflinePacket::NoFreeIncomingConnections(NoFreeIncomingConnections {
                server_guid: self.config.guid,
            });
            self.send_packet(&reply.into(), source);
            return;
        }

        let mtu = negotiate_mtu(request.mtu, self.config.connection.max_mtu);
        let reply = self.reply2(source, mtu);
        self.send_packet(&reply.into(), source);

        let connection = Connection::new(
            key,
            mtu,
            Some(request.client_guid),
            self.config.connection.clone(),
            now,
        );
        if let Err(err) = self.registry.add(connection) {
            debug!(%source, error = %err, "Could not register connection");
            return;
        }

        info!(%source, guid = request.client_guid, mtu, "Connection established");
        self.stats.handshakes_completed += 1;
        self.events.push_back(ServerEvent::Connected {
            address: source,
            guid: request.client_guid,
            mtu,
        });
    }

    fn reply2(&self, source: SocketAddr, mtu: u16) -> OfflinePacket {
        OfflinePacket::OpenConnectionReply2(OpenConnectionReply2 {
            server_guid: self.config.guid,
            client_address: source,
            mtu,
            encryption: false,
        })
    }

    fn handle_connected(&mut self, packet: Packet, source: SocketAddr, now: Instant) {
        let key = AddressKey::from(source);
        let Some(connection) = self.registry.get_mut(&key) else {
            trace!(%source, packet_type = %packet.packet_type(), "Dropping datagram from unknown peer");
            self.stats.unroutable_dropped += 1;
            return;
        };

        connection.touch(now);
        match packet {
            Packet::Ack(ack) => connection.handle_ack(&ack),
            Packet::Nack(nack) => connection.handle_nack(&nack, now),
            Packet::FrameSet(set) => connection.handle_frame_set(set, now),
            Packet::Unknown(value, _) => {
                trace!(%source, id = value, "Dropping unknown packet");
                self.stats.unknown_dropped += 1;
            }
            Packet::Offline(_) => {}
        }

        let peer_left = drain(
            connection,
            &mut self.outbound,
            &mut self.events,
            &mut self.stats,
        );
        if peer_left && self.registry.remove(&key).is_some() {
            info!(%source, "Peer disconnected");
            self.events.push_back(ServerEvent::Disconnected {
                address: source,
                reason: DisconnectReason::PeerClosed,
            });
        }
    }

    /// Periodic maintenance of every connection
    ///
    /// Connections that time out are removed and reported once.
    pub fn tick(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for (key, connection) in self.registry.iter_mut() {
            if connection.tick(now) != ConnectionState::Active {
                expired.push(*key);
            }
            drain(
                connection,
                &mut self.outbound,
                &mut self.events,
                &mut self.stats,
            );
        }

        for key in expired {
            if self.registry.remove(&key).is_some() {
                info!(address = %key, "Connection lost");
                self.stats.timeouts += 1;
                self.events.push_back(ServerEvent::Disconnected {
                    address: key.to_socket_addr(),
                    reason: DisconnectReason::TimedOut,
                });
            }
        }
    }

    /// Encode a packet and queue it for `destination`
    pub fn send_packet(&mut self, packet: &Packet, destination: SocketAddr) {
        self.send_datagram(packet.to_bytes().freeze(), destination);
    }

    /// Queue an already encoded datagram
    pub fn send_datagram(&mut self, payload: Bytes, destination: SocketAddr) {
        self.outbound.push_back(Transmit {
            destination,
            payload,
        });
    }

    /// Send an application payload to a connected peer
    pub fn send(
        &mut self,
        address: SocketAddr,
        payload: Bytes,
        reliability: Reliability,
        channel: u8,
        now: Instant,
    ) -> Result<(), ServerError> {
        let connection = self
            .registry
            .get_mut(&AddressKey::from(address))
            .ok_or(ServerError::ConnectionNotFound(address))?;

        connection.send(payload, reliability, channel, now)?;
        drain(
            connection,
            &mut self.outbound,
            &mut self.events,
            &mut self.stats,
        );
        Ok(())
    }

    /// Notify the peer and drop its connection
    pub fn disconnect(&mut self, address: SocketAddr, now: Instant) -> Result<(), ServerError> {
        let mut connection = self
            .registry
            .remove(&AddressKey::from(address))
            .ok_or(ServerError::ConnectionNotFound(address))?;

        connection.close(now);
        drain(
            &mut connection,
            &mut self.outbound,
            &mut self.events,
            &mut self.stats,
        );

        info!(%address, "Connection closed");
        self.events.push_back(ServerEvent::Disconnected {
            address,
            reason: DisconnectReason::Requested,
        });
        Ok(())
    }

    /// Next datagram to put on the wire
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        let transmit = self.outbound.pop_front()?;
        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += transmit.payload.len() as u64;
        Some(transmit)
    }

    /// Next event for the application
    pub fn poll_event(&mut self) -> Option<ServerEvent> {
        self.events.pop_front()
    }

    pub fn has_pending_transmit(&self) -> bool {
        !self.outbound.is_empty()
    }
}

/// Move a connection's queued datagrams and delivered payloads into the
/// dispatcher queues
///
/// Returns true when the peer sent a disconnect notification; payloads
/// after it are discarded.
fn drain(
    connection: &mut Connection,
    outbound: &mut VecDeque<Transmit>,
    events: &mut VecDeque<ServerEvent>,
    stats: &mut ServerStats,
) -> bool {
    let address = connection.address().to_socket_addr();
    while let Some(payload) = connection.poll_transmit() {
        outbound.push_back(Transmit {
            destination: address,
            payload,
        });
    }
    while let Some(payload) = connection.recv() {
        if payload[..] == [DISCONNECT_NOTIFICATION] {
            return true;
        }
        stats.payloads_delivered += 1;
        events.push_back(ServerEvent::Payload { address, payload });
    }
    false
}
