//! Wire format tests for RakNet packet encoding
//!
//! Byte layouts are checked field by field against what RakNet peers put on
//! the wire.

use bytes::Bytes;
use rak_protocol::packet::id;
use rak_protocol::{
    AckPacket, AckRange, Frame, FrameSet, IncompatibleProtocolVersion, OpenConnectionReply2,
    OpenConnectionRequest1, OpenConnectionRequest2, OrderInfo, Packet, PacketError, PacketType,
    Reliability, SeqNumber, SplitInfo, UnconnectedPing, UnconnectedPong, MAGIC,
};

#[test]
fn test_magic_bytes() {
    assert_eq!(
        MAGIC,
        [
            0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34,
            0x56, 0x78
        ]
    );
}

#[test]
fn test_ping_layout() {
    let ping = UnconnectedPing {
        time: 0x0102_0304_0506_0708,
        client_guid: 0x1112_1314_1516_1718,
    };
    let bytes = ping.to_bytes(false);

    assert_eq!(bytes.len(), 33);
    assert_eq!(bytes[0], 0x01);
    assert_eq!(&bytes[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(&bytes[9..25], &MAGIC);
    assert_eq!(&bytes[25..33], &[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]);

    assert_eq!(ping.to_bytes(true)[0], 0x02);
}

#[test]
fn test_pong_layout() {
    let pong = UnconnectedPong {
        time: 5,
        server_guid: 6,
        status: "MCPE;hello".to_string(),
    };
    let bytes = pong.to_bytes();

    assert_eq!(bytes[0], 0x1c);
    assert_eq!(&bytes[1..9], &5u64.to_be_bytes());
    assert_eq!(&bytes[9..17], &6u64.to_be_bytes());
    assert_eq!(&bytes[17..33], &MAGIC);
    assert_eq!(&bytes[33..35], &10u16.to_be_bytes());
    assert_eq!(&bytes[35..], b"MCPE;hello");
}

#[test]
fn test_request1_probes_mtu_with_padding() {
    let request = OpenConnectionRequest1 {
        protocol_version: 11,
        mtu: 1492,
    };
    let bytes = request.to_bytes();

    // Datagram plus IP and UDP headers equals the probed MTU
    assert_eq!(bytes.len() + 28, 1492);
    assert_eq!(bytes[0], 0x05);
    assert_eq!(&bytes[1..17], &MAGIC);
    assert_eq!(bytes[17], 11);
    assert!(bytes[18..].iter().all(|&b| b == 0));

    let parsed = OpenConnectionRequest1::from_bytes(&bytes).unwrap();
    assert_eq!(parsed, request);
}

#[test]
fn test_ipv4_address_is_inverted() {
    let reply = OpenConnectionReply2 {
        server_guid: 1,
        client_address: "192.168.1.2:19132".parse().unwrap(),
        mtu: 1400,
        encryption: false,
    };
    let bytes = reply.to_bytes();

    // id, magic, guid, then the address
    let address = &bytes[25..32];
    assert_eq!(address[0], 4);
    assert_eq!(&address[1..5], &[!192u8, !168, !1, !2]);
    assert_eq!(&address[5..7], &19132u16.to_be_bytes());
    assert_eq!(&bytes[32..34], &1400u16.to_be_bytes());
    assert_eq!(bytes[34], 0);
    assert_eq!(bytes.len(), 35);
}

#[test]
fn test_ipv6_address_layout() {
    let request = OpenConnectionRequest2 {
        server_address: "[::1]:19133".parse().unwrap(),
        mtu: 1200,
        client_guid: 9,
    };
    let bytes = request.to_bytes();

    let address = &bytes[17..46];
    assert_eq!(address[0], 6);
    assert_eq!(&address[1..3], &23u16.to_le_bytes());
    assert_eq!(&address[3..5], &19133u16.to_be_bytes());
    assert_eq!(&address[5..9], &[0, 0, 0, 0]);
    assert_eq!(address[24], 1);
    assert_eq!(&address[25..29], &[0, 0, 0, 0]);

    let parsed = OpenConnectionRequest2::from_bytes(&bytes).unwrap();
    assert_eq!(parsed, request);
}

#[test]
fn test_request2_rejects_small_mtu() {
    let request = OpenConnectionRequest2 {
        server_address: "127.0.0.1:19132".parse().unwrap(),
        mtu: 300,
        client_guid: 1,
    };
    assert_eq!(
        Packet::from_bytes(&request.to_bytes()),
        Err(PacketError::InvalidMtu(300))
    );
}

#[test]
fn test_incompatible_version_layout() {
    let packet = IncompatibleProtocolVersion {
        protocol_version: 11,
        server_guid: 0xff,
    };
    let bytes = packet.to_bytes();

    assert_eq!(bytes[0], 0x19);
    assert_eq!(bytes[1], 11);
    assert_eq!(&bytes[2..18], &MAGIC);
    assert_eq!(&bytes[18..26], &0xffu64.to_be_bytes());
}

#[test]
fn test_ack_record_layout() {
    let ack = AckPacket::new(vec![
        AckRange::single(SeqNumber::new(0x010203)),
        AckRange::new(SeqNumber::new(10), SeqNumber::new(20)),
    ]);
    let bytes = ack.to_bytes(id::ACK);

    assert_eq!(bytes[0], 0xc0);
    assert_eq!(&bytes[1..3], &2u16.to_be_bytes());
    // Single record: flag, then a little-endian u24
    assert_eq!(&bytes[3..7], &[1, 0x03, 0x02, 0x01]);
    // Range record: flag, low, high
    assert_eq!(&bytes[7..14], &[0, 10, 0, 0, 20, 0, 0]);
    assert_eq!(bytes.len(), 14);

    let nack = ack.to_bytes(id::NACK);
    assert_eq!(nack[0], 0xa0);
    assert_eq!(Packet::from_bytes(&nack).unwrap(), Packet::Nack(ack));
}

#[test]
fn test_frame_header_layout() {
    let frame = Frame {
        reliability: Reliability::ReliableOrdered,
        reliable_index: Some(SeqNumber::new(1)),
        sequence_index: None,
        order: Some(OrderInfo {
            index: SeqNumber::new(2),
            channel: 5,
        }),
        split: Some(SplitInfo {
            count: 3,
            id: 7,
            index: 1,
        }),
        payload: Bytes::from_static(b"abc"),
    };
    let set = FrameSet::new(SeqNumber::new(0x0a0b0c), vec![frame]);
    let bytes = set.to_bytes();

    assert_eq!(bytes[0], 0x84);
    assert_eq!(&bytes[1..4], &[0x0c, 0x0b, 0x0a]);
    // reliability 3 in the top bits, split flag set
    assert_eq!(bytes[4], (3 << 5) | 0x10);
    assert_eq!(&bytes[5..7], &24u16.to_be_bytes());
    assert_eq!(&bytes[7..10], &[1, 0, 0]);
    assert_eq!(&bytes[10..13], &[2, 0, 0]);
    assert_eq!(bytes[13], 5);
    assert_eq!(&bytes[14..18], &3u32.to_be_bytes());
    assert_eq!(&bytes[18..20], &7u16.to_be_bytes());
    assert_eq!(&bytes[20..24], &1u32.to_be_bytes());
    assert_eq!(&bytes[24..], b"abc");
    assert_eq!(bytes.len(), set.size());
}

#[test]
fn test_sequenced_frame_carries_both_indices() {
    let frame = Frame {
        reliability: Reliability::UnreliableSequenced,
        reliable_index: None,
        sequence_index: Some(SeqNumber::new(4)),
        order: Some(OrderInfo {
            index: SeqNumber::new(9),
            channel: 1,
        }),
        split: None,
        payload: Bytes::from_static(b"x"),
    };
    let set = FrameSet::new(SeqNumber::ZERO, vec![frame.clone()]);
    let bytes = set.to_bytes();

    assert_eq!(bytes[4], 1 << 5);
    assert_eq!(&bytes[7..10], &[4, 0, 0]);
    assert_eq!(&bytes[10..13], &[9, 0, 0]);
    assert_eq!(bytes[13], 1);

    let parsed = FrameSet::from_bytes(&bytes).unwrap();
    assert_eq!(parsed.frames, vec![frame]);
}

#[test]
fn test_multiple_frames_per_set() {
    let frames = vec![
        Frame::new(Reliability::Unreliable, Bytes::from_static(b"one")),
        Frame::new(Reliability::Unreliable, Bytes::from_static(b"two")),
    ];
    let set = FrameSet::new(SeqNumber::new(1), frames);
    let parsed = FrameSet::from_bytes(&set.to_bytes()).unwrap();

    assert_eq!(parsed.frames.len(), 2);
    assert_eq!(&parsed.frames[1].payload[..], b"two");
}

#[test]
fn test_truncated_packets_rejected() {
    let set = FrameSet::new(
        SeqNumber::new(1),
        vec![Frame::new(Reliability::Unreliable, Bytes::from_static(b"payload"))],
    );
    let bytes = set.to_bytes();
    for len in 1..bytes.len() {
        assert!(
            Packet::from_bytes(&bytes[..len]).is_err(),
            "truncated to {} bytes",
            len
        );
    }

    let ping = UnconnectedPing {
        time: 1,
        client_guid: 2,
    }
    .to_bytes(false);
    assert!(Packet::from_bytes(&ping[..20]).is_err());
}

#[test]
fn test_bad_magic_rejected() {
    let mut bytes = OpenConnectionRequest1 {
        protocol_version: 11,
        mtu: 600,
    }
    .to_bytes();
    bytes[5] ^= 0xff;
    assert_eq!(Packet::from_bytes(&bytes), Err(PacketError::InvalidMagic));
}

#[test]
fn test_packet_type_from_id() {
    assert_eq!(PacketType::from_id(0x01), PacketType::UnconnectedPing);
    assert_eq!(PacketType::from_id(0x07), PacketType::OpenConnectionRequest2);
    assert_eq!(PacketType::from_id(0x80), PacketType::FrameSet);
    assert_eq!(PacketType::from_id(0x8f), PacketType::FrameSet);
    assert_eq!(PacketType::from_id(0xa0), PacketType::Nack);
    assert_eq!(PacketType::from_id(0xc0), PacketType::Ack);
    assert_eq!(PacketType::from_id(0x13), PacketType::Unknown(0x13));
    assert!(PacketType::from_id(0x05).is_offline());
    assert!(!PacketType::from_id(0x84).is_offline());
}
