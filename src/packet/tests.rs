use super::*;
use crate::dht::{NodeId, PeerInfo};

fn codec() -> Codec {
    Codec::new().unwrap()
}

fn assert_round_trip(packet: Packet) {
    let encoded = packet.encode().unwrap();
    assert_eq!(&encoded[..2], &packet.header());
    assert_eq!(codec().decode(&encoded), Some(packet));
}

#[test]
fn test_known_kinds_build_a_codec() {
    let codec = codec();
    assert_eq!(codec.kind_count(), KNOWN_KINDS.len());
}

#[test]
fn test_local_peer_request_round_trip() {
    assert_round_trip(Packet::LocalPeerRequest {
        id: NodeId::generate(),
        port: 4,
    });
}

#[test]
fn test_local_peer_response_round_trip() {
    assert_round_trip(Packet::LocalPeerResponse {
        id: NodeId::generate(),
        port: 65535,
    });
}

#[test]
fn test_ping_zero_id() {
    let nonce: Nonce = rand::random();
    let packet = Packet::Ping {
        id: NodeId([0u8; 20]),
        nonce,
    };
    let encoded = packet.encode().unwrap();
    assert_eq!(encoded.len(), 42);
    assert_eq!(&encoded[..2], &[0x00, 0x02]);

    match codec().decode(&encoded) {
        Some(Packet::Ping { id, nonce: decoded }) => {
            assert_eq!(id.0, [0u8; 20]);
            assert_eq!(decoded.len(), 20);
            assert_eq!(decoded, nonce);
        }
        other => panic!("expected ping, got {:?}", other),
    }
}

#[test]
fn test_pong_round_trip() {
    assert_round_trip(Packet::Pong {
        id: NodeId::generate(),
        nonce: rand::random(),
    });
}

#[test]
fn test_find_node_round_trip() {
    assert_round_trip(Packet::FindNode {
        id: NodeId::generate(),
        target: NodeId::generate(),
    });
}

#[test]
fn test_find_node_response_round_trip() {
    assert_round_trip(Packet::FindNodeResponse {
        id: NodeId::generate(),
        target: NodeId::generate(),
        peers: vec![
            PeerInfo::new(NodeId::generate(), "123.123.123.432", 555),
            PeerInfo::new(NodeId::generate(), "123.123.123.432", 583),
        ],
    });
}

#[test]
fn test_find_node_response_empty_list() {
    assert_round_trip(Packet::FindNodeResponse {
        id: NodeId::generate(),
        target: NodeId::generate(),
        peers: Vec::new(),
    });
}

#[test]
fn test_find_node_response_json_layout() {
    let peer_id = NodeId([0xAB; 20]);
    let packet = Packet::FindNodeResponse {
        id: NodeId([1u8; 20]),
        target: NodeId([2u8; 20]),
        peers: vec![PeerInfo::new(peer_id, "10.0.0.1", 9000)],
    };
    let encoded = packet.encode().unwrap();

    let json: serde_json::Value = serde_json::from_slice(&encoded[42..]).unwrap();
    assert_eq!(json[0]["id"], "ab".repeat(20));
    assert_eq!(json[0]["address"], "10.0.0.1");
    assert_eq!(json[0]["port"], 9000);
}

#[test]
fn test_chat_message_round_trip() {
    assert_round_trip(Packet::ChatMessage {
        id: NodeId::generate(),
        message: "hi! 👋".to_string(),
    });
}

#[test]
fn test_duplicate_header_rejected() {
    let kinds = [
        PacketKind::new("first", &[0x10, 0x00], |_| None),
        PacketKind::new("second", &[0x10, 0x00], |_| None),
    ];

    match Codec::with_kinds(kinds) {
        Err(PacketError::DuplicateHeader { name, other }) => {
            assert_eq!(name, "second");
            assert_eq!(other, "first");
        }
        other => panic!("expected duplicate header error, got {:?}", other),
    }
}

#[test]
fn test_header_length_rejected() {
    let short = [PacketKind::new("short", &[0x01], |_| None)];
    assert!(matches!(
        Codec::with_kinds(short),
        Err(PacketError::InvalidHeaderLength { name: "short", len: 1 })
    ));

    let long = [PacketKind::new("long", &[0x01, 0x02, 0x03], |_| None)];
    assert!(matches!(
        Codec::with_kinds(long),
        Err(PacketError::InvalidHeaderLength { len: 3, .. })
    ));
}

#[test]
fn test_unknown_header_is_unrecognized() {
    let mut data = vec![0xFF, 0xFF];
    data.extend_from_slice(&[0u8; 40]);
    assert_eq!(codec().decode(&data), None);
}

#[test]
fn test_truncated_and_oversized_fixed_packets() {
    let codec = codec();
    let encoded = Packet::Ping {
        id: NodeId::generate(),
        nonce: rand::random(),
    }
    .encode()
    .unwrap();

    for len in 0..encoded.len() {
        assert_eq!(codec.decode(&encoded[..len]), None, "length {}", len);
    }

    let mut oversized = encoded.to_vec();
    oversized.push(0);
    assert_eq!(codec.decode(&oversized), None);

    let request = Packet::LocalPeerRequest {
        id: NodeId::generate(),
        port: 1,
    }
    .encode()
    .unwrap();
    assert_eq!(codec.decode(&request[..request.len() - 1]), None);
}

#[test]
fn test_find_node_response_bad_peer_list() {
    let codec = codec();
    let mut data = FIND_NODE_RESPONSE.to_vec();
    data.extend_from_slice(&[1u8; 40]);

    let mut not_json = data.clone();
    not_json.extend_from_slice(b"{not json");
    assert_eq!(codec.decode(&not_json), None);

    let mut bad_id = data.clone();
    bad_id.extend_from_slice(br#"[{"id":"zz","address":"1.2.3.4","port":1}]"#);
    assert_eq!(codec.decode(&bad_id), None);

    let mut bad_port = data;
    bad_port.extend_from_slice(
        format!(r#"[{{"id":"{}","address":"1.2.3.4","port":70000}}]"#, "00".repeat(20)).as_bytes(),
    );
    assert_eq!(codec.decode(&bad_port), None);
}

#[test]
fn test_random_bytes_never_panic() {
    let codec = codec();
    for len in 0..128 {
        let mut data = vec![0u8; len];
        rand::Rng::fill(&mut rand::rng(), data.as_mut_slice());
        if len >= 2 {
            data[0] = 0;
            data[1] = (len % 8) as u8;
        }
        let _ = codec.decode(&data);
    }
}

#[test]
fn test_sender_is_leading_id() {
    let id = NodeId::generate();
    let packets = [
        Packet::LocalPeerResponse { id, port: 1 },
        Packet::Pong {
            id,
            nonce: [1u8; 20],
        },
        Packet::FindNode {
            id,
            target: NodeId::generate(),
        },
        Packet::ChatMessage {
            id,
            message: "hi".to_string(),
        },
    ];
    for packet in &packets {
        assert_eq!(packet.sender(), &id, "{}", packet.name());
    }
}
