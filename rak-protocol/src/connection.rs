//! Per-peer reliability engine
//!
//! A [`Connection`] turns the unreliable datagram stream of one peer into
//! reliable, ordered and sequenced delivery. It performs no I/O: decoded
//! packets are handed in by the caller, outbound datagrams are queued and
//! drained with [`Connection::poll_transmit`], delivered payloads with
//! [`Connection::recv`]. Every time-dependent operation takes `now`.

use crate::ack::{AckPacket, AckRange};
use crate::address::AddressKey;
use crate::buffer::{BufferError, ReceiveWindow, Received, ResendWindow};
use crate::config::ConnectionConfig;
use crate::frame::{Frame, FrameSet, OrderInfo, Reliability, SplitInfo};
use crate::handshake::negotiate_mtu;
use crate::loss::ReceiverLossList;
use crate::ordering::{OrderingChannel, OutgoingChannels, ORDERING_CHANNELS};
use crate::packet::{id, FRAME_SET_HEADER_SIZE, UDP_HEADER_SIZE};
use crate::sequence::SeqNumber;
use crate::split::SplitAssembler;
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Application message a peer sends before leaving
pub const DISCONNECT_NOTIFICATION: u8 = 0x15;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Exchanging data
    Active,
    /// Nothing received within the timeout window, or retransmissions exhausted
    TimedOut,
    /// Closed locally
    Closed,
}

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection is not active ({0:?})")]
    NotActive(ConnectionState),

    #[error("Payload is empty")]
    EmptyPayload,

    #[error("Payload of {size} bytes needs more than {max} fragments")]
    PayloadTooLarge { size: usize, max: u32 },

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
}

/// Connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Application payloads queued with [`Connection::send`]
    pub payloads_sent: u64,
    /// Application payloads handed to [`Connection::recv`]
    pub payloads_delivered: u64,
    pub retransmissions: u64,
    /// Datagrams and reliable frames seen twice
    pub duplicates_dropped: u64,
    /// Frames discarded by ordering or sequencing
    pub frames_dropped: u64,
    /// Fragments refused or split payloads that expired
    pub splits_dropped: u64,
    pub acks_sent: u64,
    pub nacks_sent: u64,
    pub acks_received: u64,
    pub nacks_received: u64,
}

/// Reliability state of one remote peer
pub struct Connection {
    address: AddressKey,
    guid: Option<u64>,
    mtu: u16,
    config: ConnectionConfig,
    state: ConnectionState,
    created_at: Instant,
    last_receive: Instant,

    /// Sequence number of the next outgoing datagram
    next_datagram: SeqNumber,
    /// Reliable message index of the next reliable frame
    next_reliable: SeqNumber,
    next_split_id: u16,
    outgoing: OutgoingChannels,
    resend: ResendWindow,

    /// Incoming datagram sequence numbers
    received: ReceiveWindow,
    /// Incoming reliable message indices
    reliable_seen: ReceiveWindow,
    /// Datagrams received since the last ACK flush
    pending_acks: Vec<SeqNumber>,
    losses: ReceiverLossList,
    channels: Vec<OrderingChannel>,
    splits: SplitAssembler,

    delivered: VecDeque<Bytes>,
    outbound: VecDeque<Bytes>,
    stats: ConnectionStats,
}

impl Connection {
    /// Create a connection for a peer that completed the handshake
    pub fn new(
        address: AddressKey,
        mtu: u16,
        guid: Option<u64>,
        config: ConnectionConfig,
        now: Instant,
    ) -> Self {
        let channels = (0..ORDERING_CHANNELS)
            .map(|_| OrderingChannel::new(config.reorder_window))
            .collect();

        Connection {
            address,
            guid,
            mtu: negotiate_mtu(mtu, config.max_mtu),
            state: ConnectionState::Active,
            created_at: now,
            last_receive: now,
            next_datagram: SeqNumber::ZERO,
            next_reliable: SeqNumber::ZERO,
            next_split_id: 0,
            outgoing: OutgoingChannels::new(),
            resend: ResendWindow::new(config.resend_capacity),
            received: ReceiveWindow::new(config.reorder_window),
            reliable_seen: ReceiveWindow::new(config.reorder_window),
            pending_acks: Vec::new(),
            losses: ReceiverLossList::new(config.max_nack_count, config.nack_interval),
            channels,
            splits: SplitAssembler::new(
                config.max_split_count,
                config.max_concurrent_splits,
                config.split_timeout,
            ),
            delivered: VecDeque::new(),
            outbound: VecDeque::new(),
            stats: ConnectionStats::default(),
            config,
        }
    }

    pub fn address(&self) -> AddressKey {
        self.address
    }

    /// GUID the peer announced during the handshake
    pub fn guid(&self) -> Option<u64> {
        self.guid
    }

    /// Negotiated MTU
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_receive(&self) -> Instant {
        self.last_receive
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Datagrams awaiting acknowledgment
    pub fn in_flight(&self) -> usize {
        self.resend.len()
    }

    /// Record that a datagram arrived from the peer
    pub fn touch(&mut self, now: Instant) {
        self.last_receive = now;
    }

    fn ensure_active(&self) -> Result<(), ConnectionError> {
        if !self.is_active() {
            return Err(ConnectionError::NotActive(self.state));
        }
        Ok(())
    }

    /// Room for frames in one datagram
    fn frame_budget(&self) -> usize {
        (self.mtu as usize).saturating_sub(UDP_HEADER_SIZE + FRAME_SET_HEADER_SIZE)
    }

    /// Queue an application payload
    ///
    /// Payloads that do not fit one datagram are split into fragments sharing
    /// a fresh split id; unreliable kinds are upgraded to their reliable
    /// variant in that case. `channel` is only consulted by ordered and
    /// sequenced kinds.
    pub fn send(
        &mut self,
        payload: Bytes,
        reliability: Reliability,
        channel: u8,
        now: Instant,
    ) -> Result<(), ConnectionError> {
        self.ensure_active()?;
        if payload.is_empty() {
            return Err(ConnectionError::EmptyPayload);
        }

        let budget = self.frame_budget();
        let size = payload.len();
        let (reliability, chunks) = if size <= budget - Frame::header_size_for(reliability, false) {
            (reliability, vec![payload])
        } else {
            let reliability = reliability.for_split();
            let capacity = budget - Frame::header_size_for(reliability, true);
            let count = (size + capacity - 1) / capacity;
            if count > self.config.max_split_count as usize {
                return Err(ConnectionError::PayloadTooLarge {
                    size,
                    max: self.config.max_split_count,
                });
            }
            let chunks = (0..count)
                .map(|i| payload.slice(i * capacity..((i + 1) * capacity).min(size)))
                .collect();
            (reliability, chunks)
        };

        if reliability.has_order_info() && channel as usize >= ORDERING_CHANNELS {
            return Err(BufferError::ChannelOutOfRange(channel).into());
        }
        if reliability.is_reliable() {
            let last = self.next_datagram + (chunks.len() as u32 - 1);
            if !self.resend.can_insert(last) {
                return Err(BufferError::Full(self.resend.len()).into());
            }
        }

        let sequence_index = if reliability.is_sequenced() {
            Some(self.outgoing.next_sequence(channel)?)
        } else {
            None
        };
        let order = if reliability.is_ordered() {
            Some(OrderInfo {
                index: self.outgoing.next_order(channel)?,
                channel,
            })
        } else if reliability.is_sequenced() {
            Some(OrderInfo {
                index: self.outgoing.order(channel)?,
                channel,
            })
        } else {
            None
        };

        let count = chunks.len() as u32;
        let split_id = self.next_split_id;
        if count > 1 {
            self.next_split_id = self.next_split_id.wrapping_add(1);
        }

        for (index, chunk) in chunks.into_iter().enumerate() {
            let reliable_index = if reliability.is_reliable() {
                Some(self.next_reliable.fetch_increment())
            } else {
                None
            };
            let split = (count > 1).then_some(SplitInfo {
                count,
                id: split_id,
                index: index as u32,
            });

            let frame = Frame {
                reliability,
                reliable_index,
                sequence_index,
                order,
                split,
                payload: chunk,
            };
            self.transmit(vec![frame], reliability.is_reliable(), now)?;
        }

        self.stats.payloads_sent += 1;
        trace!(address = %self.address, size, ?reliability, fragments = count, "Queued payload");
        Ok(())
    }

    /// Wrap frames in a new datagram and queue it
    fn transmit(&mut self, frames: Vec<Frame>, reliable: bool, now: Instant) -> Result<(), BufferError> {
        let seq = self.next_datagram.fetch_increment();
        let datagram = FrameSet::new(seq, frames).to_bytes().freeze();
        if reliable {
            self.resend.insert(seq, datagram.clone(), now)?;
        }
        self.queue(datagram);
        Ok(())
    }

    fn queue(&mut self, datagram: Bytes) {
        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += datagram.len() as u64;
        self.outbound.push_back(datagram);
    }

    /// Process an incoming frame-set
    pub fn handle_frame_set(&mut self, set: FrameSet, now: Instant) {
        if !self.is_active() {
            return;
        }

        self.last_receive = now;
        self.stats.datagrams_received += 1;
        self.stats.bytes_received += set.size() as u64;

        if self.received.is_duplicate(set.sequence) {
            trace!(address = %self.address, seq = %set.sequence, "Duplicate datagram");
            self.stats.duplicates_dropped += 1;
            // The ACK for the first copy may have been lost
            self.pending_acks.push(set.sequence);
            return;
        }

        // A datagram is taken whole or not at all, so a refused one stays
        // unacknowledged and comes back with its resend
        let reliable_seen = &self.reliable_seen;
        let fresh = set.frames.iter().filter(|frame| {
            frame
                .reliable_index
                .map_or(true, |index| !reliable_seen.is_duplicate(index))
        });
        if let Err(err) = self.splits.admit(fresh) {
            debug!(address = %self.address, seq = %set.sequence, error = %err, "Refusing datagram");
            self.stats.splits_dropped += 1;
            return;
        }

        if let Received::New { gap } = self.received.insert(set.sequence) {
            self.pending_acks.push(set.sequence);
            self.losses.remove(set.sequence);
            if let Some(gap) = gap {
                trace!(address = %self.address, start = %gap.start, end = %gap.end, "Datagram gap");
                self.losses.add_range(gap, now);
            }
        }

        for frame in set.frames {
            self.handle_frame(frame, now);
        }
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) {
        let reliable_index = frame.reliable_index;
        if let Some(index) = reliable_index {
            if self.reliable_seen.is_duplicate(index) {
                self.stats.duplicates_dropped += 1;
                return;
            }
        }

        let assembled = match self.splits.insert(frame, now) {
            Ok(assembled) => assembled,
            Err(err) => {
                debug!(address = %self.address, error = %err, "Dropping fragment");
                self.stats.splits_dropped += 1;
                return;
            }
        };

        // Marked only once stored, so a refused fragment is taken on resend
        if let Some(index) = reliable_index {
            self.reliable_seen.insert(index);
        }

        if let Some(frame) = assembled {
            self.deliver(frame);
        }
    }

    /// Apply the delivery rule of the frame's reliability kind
    fn deliver(&mut self, frame: Frame) {
        let reliability = frame.reliability;
        let order = match frame.order {
            Some(order) if reliability.has_order_info() => order,
            _ => {
                self.push_delivered(frame.payload);
                return;
            }
        };

        let Some(channel) = self.channels.get_mut(order.channel as usize) else {
            debug!(address = %self.address, channel = order.channel, "Frame on unknown channel");
            self.stats.frames_dropped += 1;
            return;
        };

        let mut ready = Vec::new();
        if reliability.is_sequenced() {
            let index = frame.sequence_index.unwrap_or(order.index);
            if channel.accept_sequenced(index) {
                ready.push(frame.payload);
            } else {
                self.stats.frames_dropped += 1;
            }
        } else if let Err(err) = channel.insert_ordered(order.index, frame.payload, &mut ready) {
            debug!(address = %self.address, error = %err, "Dropping ordered frame");
            self.stats.frames_dropped += 1;
        }

        for payload in ready {
            self.push_delivered(payload);
        }
    }

    fn push_delivered(&mut self, payload: Bytes) {
        self.stats.payloads_delivered += 1;
        self.delivered.push_back(payload);
    }

    /// Forget every acknowledged datagram
    pub fn handle_ack(&mut self, ack: &AckPacket) {
        self.stats.acks_received += 1;
        let acked: usize = ack
            .ranges
            .iter()
            .map(|range| self.resend.acknowledge_range(range))
            .sum();
        trace!(address = %self.address, acked, in_flight = self.resend.len(), "ACK");
    }

    /// Retransmit every NACKed datagram right away
    pub fn handle_nack(&mut self, nack: &AckPacket, now: Instant) {
        self.stats.nacks_received += 1;

        for range in &nack.ranges {
            for seq in self.resend.covered(range) {
                // Exhausted entries are left for tick to time out
                if self.resend.retries(seq).unwrap_or(0) >= self.config.max_retries {
                    continue;
                }
                if let Some(datagram) = self.resend.mark_resent(seq, now) {
                    trace!(address = %self.address, %seq, "Resending NACKed datagram");
                    self.stats.retransmissions += 1;
                    self.queue(datagram);
                }
            }
        }
    }

    /// Periodic processing: retransmission, ACK and NACK flush, split
    /// expiry and timeout
    pub fn tick(&mut self, now: Instant) -> ConnectionState {
        if !self.is_active() {
            return self.state;
        }

        for seq in self.resend.due(now, self.config.resend_interval) {
            let retries = self.resend.retries(seq).unwrap_or(0);
            if retries >= self.config.max_retries {
                warn!(
                    address = %self.address,
                    %seq,
                    retries,
                    "Datagram never acknowledged, giving up on peer"
                );
                self.state = ConnectionState::TimedOut;
                return self.state;
            }
            if let Some(datagram) = self.resend.mark_resent(seq, now) {
                self.stats.retransmissions += 1;
                self.queue(datagram);
            }
        }

        self.flush_acks();
        self.flush_nacks(now);

        let expired = self.splits.purge(now);
        self.stats.splits_dropped += expired as u64;

        if now.saturating_duration_since(self.last_receive) > self.config.timeout {
            debug!(address = %self.address, "Connection timed out");
            self.state = ConnectionState::TimedOut;
        }

        self.state
    }

    fn flush_acks(&mut self) {
        if self.pending_acks.is_empty() {
            return;
        }

        let base = self.received.start() - self.received.size();
        let ranges = AckRange::coalesce(base, &self.pending_acks);
        self.pending_acks.clear();

        for packet in AckPacket::chunked(ranges, self.mtu) {
            self.stats.acks_sent += 1;
            self.queue(packet.to_bytes(id::ACK).freeze());
        }
    }

    fn flush_nacks(&mut self, now: Instant) {
        let ranges = self.losses.nack_ranges(now);
        if ranges.is_empty() {
            return;
        }

        for packet in AckPacket::chunked(ranges, self.mtu) {
            self.stats.nacks_sent += 1;
            self.queue(packet.to_bytes(id::NACK).freeze());
        }
    }

    /// Tell the peer we are leaving and stop processing
    ///
    /// The notification is queued before the state changes, so it is still
    /// returned by [`poll_transmit`](Self::poll_transmit).
    pub fn close(&mut self, now: Instant) {
        if !self.is_active() {
            return;
        }
        let notice = Bytes::from_static(&[DISCONNECT_NOTIFICATION]);
        if let Err(err) = self.send(notice, Reliability::ReliableOrdered, 0, now) {
            debug!(address = %self.address, error = %err, "Could not queue disconnect notification");
        }
        self.state = ConnectionState::Closed;
        self.resend.clear();
    }

    /// Next delivered application payload
    pub fn recv(&mut self) -> Option<Bytes> {
        self.delivered.pop_front()
    }

    /// Next datagram to put on the wire
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.outbound.pop_front()
    }

    pub fn has_pending_transmit(&self) -> bool {
        !self.outbound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::sequence::MAX_SEQ_NUMBER;
    use std::time::Duration;

    const MTU: u16 = 576;

    fn connection(now: Instant) -> Connection {
        Connection::new(
            "127.0.0.1:19132".parse::<std::net::SocketAddr>().unwrap().into(),
            MTU,
            Some(42),
            ConnectionConfig::default(),
            now,
        )
    }

    fn drain(conn: &mut Connection) -> Vec<Bytes> {
        std::iter::from_fn(|| conn.poll_transmit()).collect()
    }

    fn delivered(conn: &mut Connection) -> Vec<Bytes> {
        std::iter::from_fn(|| conn.recv()).collect()
    }

    fn ordered_set(seq: u32, order: u32, payload: &'static [u8]) -> FrameSet {
        FrameSet::new(
            SeqNumber::new(seq),
            vec![Frame {
                reliability: Reliability::ReliableOrdered,
                reliable_index: Some(SeqNumber::new(seq)),
                sequence_index: None,
                order: Some(OrderInfo {
                    index: SeqNumber::new(order),
                    channel: 0,
                }),
                split: None,
                payload: Bytes::from_static(payload),
            }],
        )
    }

    fn acks(datagrams: &[Bytes]) -> Vec<AckPacket> {
        datagrams
            .iter()
            .filter_map(|bytes| match Packet::from_bytes(bytes) {
                Ok(Packet::Ack(ack)) => Some(ack),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ordered_delivery_after_reordering() {
        let now = Instant::now();
        let mut conn = connection(now);

        conn.handle_frame_set(ordered_set(0, 2, b"c"), now);
        assert!(delivered(&mut conn).is_empty());

        conn.handle_frame_set(ordered_set(1, 0, b"a"), now);
        conn.handle_frame_set(ordered_set(2, 1, b"b"), now);

        assert_eq!(
            delivered(&mut conn),
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );
    }

    #[test]
    fn test_duplicate_frame_set_has_no_effect() {
        let now = Instant::now();
        let mut conn = connection(now);

        conn.handle_frame_set(ordered_set(0, 0, b"once"), now);
        conn.handle_frame_set(ordered_set(0, 0, b"once"), now);

        assert_eq!(delivered(&mut conn).len(), 1);
        assert_eq!(conn.stats().duplicates_dropped, 1);

        conn.tick(now);
        let sent = drain(&mut conn);
        let acks = acks(&sent);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].ranges, vec![AckRange::single(SeqNumber::new(0))]);

        conn.tick(now + Duration::from_millis(10));
        assert!(acks_of(&mut conn).is_empty());
    }

    fn acks_of(conn: &mut Connection) -> Vec<AckPacket> {
        let sent = drain(conn);
        acks(&sent)
    }

    #[test]
    fn test_acks_are_coalesced() {
        let now = Instant::now();
        let mut conn = connection(now);

        for seq in [0, 1, 2, 4, 5] {
            conn.handle_frame_set(ordered_set(seq, seq, b"x"), now);
        }
        conn.tick(now);

        let acks = acks_of(&mut conn);
        assert_eq!(
            acks[0].ranges,
            vec![
                AckRange::new(SeqNumber::new(0), SeqNumber::new(2)),
                AckRange::new(SeqNumber::new(4), SeqNumber::new(5)),
            ]
        );
    }

    #[test]
    fn test_gap_is_nacked() {
        let now = Instant::now();
        let mut conn = connection(now);

        conn.handle_frame_set(ordered_set(0, 0, b"a"), now);
        conn.handle_frame_set(ordered_set(3, 3, b"d"), now);
        conn.tick(now);

        let nacks: Vec<AckPacket> = drain(&mut conn)
            .iter()
            .filter_map(|bytes| match Packet::from_bytes(bytes) {
                Ok(Packet::Nack(nack)) => Some(nack),
                _ => None,
            })
            .collect();
        assert_eq!(
            nacks,
            vec![AckPacket::new(vec![AckRange::new(
                SeqNumber::new(1),
                SeqNumber::new(2)
            )])]
        );
        assert_eq!(conn.stats().nacks_sent, 1);
    }

    #[test]
    fn test_reliable_resend_until_acked() {
        let start = Instant::now();
        let mut conn = connection(start);

        conn.send(Bytes::from_static(b"hello"), Reliability::Reliable, 0, start)
            .unwrap();
        let original = drain(&mut conn);
        assert_eq!(original.len(), 1);

        conn.touch(start + Duration::from_millis(290));
        conn.tick(start + Duration::from_millis(290));
        assert!(drain(&mut conn).is_empty());

        conn.tick(start + Duration::from_millis(300));
        assert_eq!(drain(&mut conn), original);
        assert_eq!(conn.stats().retransmissions, 1);

        conn.handle_ack(&AckPacket::new(vec![AckRange::single(SeqNumber::new(0))]));
        assert_eq!(conn.in_flight(), 0);

        conn.tick(start + Duration::from_secs(2));
        assert!(drain(&mut conn).is_empty());
    }

    #[test]
    fn test_unreliable_is_not_stored() {
        let now = Instant::now();
        let mut conn = connection(now);

        conn.send(Bytes::from_static(b"fire"), Reliability::Unreliable, 0, now)
            .unwrap();
        assert_eq!(drain(&mut conn).len(), 1);
        assert_eq!(conn.in_flight(), 0);
    }

    #[test]
    fn test_nack_resends_immediately() {
        let now = Instant::now();
        let mut conn = connection(now);

        conn.send(Bytes::from_static(b"one"), Reliability::Reliable, 0, now)
            .unwrap();
        conn.send(Bytes::from_static(b"two"), Reliability::Reliable, 0, now)
            .unwrap();
        let original = drain(&mut conn);

        conn.handle_nack(
            &AckPacket::new(vec![AckRange::single(SeqNumber::new(1))]),
            now,
        );
        assert_eq!(drain(&mut conn), vec![original[1].clone()]);
    }

    #[test]
    fn test_split_roundtrip_between_connections() {
        let now = Instant::now();
        let mut sender = connection(now);
        let mut receiver = connection(now);

        let payload: Bytes = (0..5000u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into();
        sender
            .send(payload.clone(), Reliability::ReliableOrdered, 3, now)
            .unwrap();

        let mut datagrams = drain(&mut sender);
        assert!(datagrams.len() > 1);
        for datagram in &datagrams {
            assert!(datagram.len() + UDP_HEADER_SIZE <= MTU as usize);
        }

        datagrams.reverse();
        for datagram in datagrams {
            let set = FrameSet::from_bytes(&datagram).unwrap();
            receiver.handle_frame_set(set, now);
        }

        assert_eq!(delivered(&mut receiver), vec![payload]);
    }

    #[test]
    fn test_unreliable_split_is_upgraded() {
        let now = Instant::now();
        let mut conn = connection(now);

        conn.send(Bytes::from(vec![7u8; 2000]), Reliability::Unreliable, 0, now)
            .unwrap();
        let datagrams = drain(&mut conn);
        assert_eq!(conn.in_flight(), datagrams.len());

        let set = FrameSet::from_bytes(&datagrams[0]).unwrap();
        assert_eq!(set.frames[0].reliability, Reliability::Reliable);
        assert!(set.frames[0].split.is_some());
    }

    #[test]
    fn test_sequenced_drops_stale() {
        let now = Instant::now();
        let mut conn = connection(now);

        let sequenced = |seq: u32, index: u32| {
            FrameSet::new(
                SeqNumber::new(seq),
                vec![Frame {
                    reliability: Reliability::UnreliableSequenced,
                    reliable_index: None,
                    sequence_index: Some(SeqNumber::new(index)),
                    order: Some(OrderInfo {
                        index: SeqNumber::ZERO,
                        channel: 1,
                    }),
                    split: None,
                    payload: Bytes::from(vec![index as u8]),
                }],
            )
        };

        conn.handle_frame_set(sequenced(0, 5), now);
        conn.handle_frame_set(sequenced(1, 3), now);
        conn.handle_frame_set(sequenced(2, 6), now);

        assert_eq!(
            delivered(&mut conn),
            vec![Bytes::from(vec![5u8]), Bytes::from(vec![6u8])]
        );
        assert_eq!(conn.stats().frames_dropped, 1);
    }

    #[test]
    fn test_timeout() {
        let start = Instant::now();
        let mut conn = connection(start);

        assert_eq!(conn.tick(start + Duration::from_secs(10)), ConnectionState::Active);
        assert_eq!(
            conn.tick(start + Duration::from_millis(10_001)),
            ConnectionState::TimedOut
        );
        assert!(conn
            .send(Bytes::from_static(b"late"), Reliability::Reliable, 0, start)
            .is_err());
    }

    #[test]
    fn test_resend_exhaustion_times_out() {
        let start = Instant::now();
        let config = ConnectionConfig {
            max_retries: 2,
            ..Default::default()
        };
        let mut conn = Connection::new(
            "127.0.0.1:1".parse::<std::net::SocketAddr>().unwrap().into(),
            MTU,
            None,
            config,
            start,
        );
        conn.send(Bytes::from_static(b"x"), Reliability::Reliable, 0, start)
            .unwrap();

        let mut now = start;
        for _ in 0..2 {
            now += Duration::from_millis(300);
            conn.touch(now);
            assert_eq!(conn.tick(now), ConnectionState::Active);
        }
        now += Duration::from_millis(300);
        conn.touch(now);
        assert_eq!(conn.tick(now), ConnectionState::TimedOut);
    }

    #[test]
    fn test_send_errors() {
        let now = Instant::now();
        let mut conn = connection(now);

        assert!(matches!(
            conn.send(Bytes::new(), Reliability::Reliable, 0, now),
            Err(ConnectionError::EmptyPayload)
        ));
        assert!(matches!(
            conn.send(Bytes::from_static(b"x"), Reliability::ReliableOrdered, 40, now),
            Err(ConnectionError::Buffer(BufferError::ChannelOutOfRange(40)))
        ));
        // Channel is ignored for unordered kinds
        assert!(conn
            .send(Bytes::from_static(b"x"), Reliability::Reliable, 40, now)
            .is_ok());
    }

    #[test]
    fn test_close_queues_notification() {
        let now = Instant::now();
        let mut conn = connection(now);

        conn.close(now);
        assert_eq!(conn.state(), ConnectionState::Closed);

        let sent = drain(&mut conn);
        let set = FrameSet::from_bytes(&sent[0]).unwrap();
        assert_eq!(&set.frames[0].payload[..], &[DISCONNECT_NOTIFICATION]);
    }

    /// Hand the receiver's ACKs and NACKs to the sender
    fn feed_back(receiver: &mut Connection, sender: &mut Connection, now: Instant) {
        for datagram in drain(receiver) {
            match Packet::from_bytes(&datagram).unwrap() {
                Packet::Ack(ack) => sender.handle_ack(&ack),
                Packet::Nack(nack) => sender.handle_nack(&nack, now),
                other => panic!("unexpected packet {:?}", other),
            }
        }
    }

    #[test]
    fn test_refused_fragment_is_resent() {
        let start = Instant::now();
        let mut sender = connection(start);
        let mut receiver = Connection::new(
            "127.0.0.1:2".parse::<std::net::SocketAddr>().unwrap().into(),
            MTU,
            None,
            ConnectionConfig {
                max_concurrent_splits: 2,
                ..Default::default()
            },
            start,
        );

        let payloads: Vec<Bytes> = (0..3u8).map(|i| Bytes::from(vec![i; 1200])).collect();
        for payload in &payloads {
            sender
                .send(payload.clone(), Reliability::ReliableOrdered, 0, start)
                .unwrap();
            // The first fragment of every payload is lost, keeping each
            // reassembly open
            for datagram in drain(&mut sender).into_iter().skip(1) {
                receiver.handle_frame_set(FrameSet::from_bytes(&datagram).unwrap(), start);
            }
        }
        assert!(receiver.stats().splits_dropped > 0);
        assert!(delivered(&mut receiver).is_empty());

        let mut now = start;
        for _ in 0..100 {
            now += Duration::from_millis(10);
            receiver.tick(now);
            feed_back(&mut receiver, &mut sender, now);
            sender.tick(now);
            for datagram in drain(&mut sender) {
                receiver.handle_frame_set(FrameSet::from_bytes(&datagram).unwrap(), now);
            }
            if sender.in_flight() == 0 {
                break;
            }
        }

        assert_eq!(delivered(&mut receiver), payloads);
        assert_eq!(sender.in_flight(), 0);
        assert!(sender.is_active());
        assert!(receiver.is_active());
    }

    #[test]
    fn test_counters_wrap_while_live() {
        let now = Instant::now();
        let mut sender = connection(now);
        let mut receiver = connection(now);
        sender.next_datagram = SeqNumber::new(MAX_SEQ_NUMBER - 2);
        sender.next_reliable = SeqNumber::new(MAX_SEQ_NUMBER - 1);

        let payloads: Vec<Bytes> = (0..6u8).map(|i| Bytes::from(vec![i; 8])).collect();
        for payload in &payloads {
            sender
                .send(payload.clone(), Reliability::ReliableOrdered, 0, now)
                .unwrap();
        }
        let datagrams = drain(&mut sender);
        assert_eq!(datagrams.len(), 6);
        assert_eq!(
            FrameSet::from_bytes(&datagrams[3]).unwrap().sequence,
            SeqNumber::ZERO
        );

        // Datagram 0, the first after the wrap, is lost
        for (i, datagram) in datagrams.iter().enumerate() {
            if i != 3 {
                receiver.handle_frame_set(FrameSet::from_bytes(datagram).unwrap(), now);
            }
        }
        assert_eq!(delivered(&mut receiver), payloads[..3].to_vec());

        receiver.tick(now);
        feed_back(&mut receiver, &mut sender, now);
        assert_eq!(sender.in_flight(), 1);

        let resent = drain(&mut sender);
        assert_eq!(resent, vec![datagrams[3].clone()]);
        receiver.handle_frame_set(FrameSet::from_bytes(&resent[0]).unwrap(), now);
        assert_eq!(delivered(&mut receiver), payloads[3..].to_vec());

        receiver.tick(now);
        feed_back(&mut receiver, &mut sender, now);
        assert_eq!(sender.in_flight(), 0);
    }

    #[test]
    fn test_mtu_bounded_by_config() {
        let conn = Connection::new(
            "127.0.0.1:3".parse::<std::net::SocketAddr>().unwrap().into(),
            1400,
            None,
            ConnectionConfig {
                max_mtu: 576,
                ..Default::default()
            },
            Instant::now(),
        );
        assert_eq!(conn.mtu(), 576);
    }
}
