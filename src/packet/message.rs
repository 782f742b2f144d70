use super::error::PacketError;
use crate::constants::{HEADER_LEN, ID_LEN, NONCE_LEN};
use crate::dht::{NodeId, PeerInfo};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub type Nonce = [u8; NONCE_LEN];

pub const LOCAL_PEER_REQUEST: [u8; HEADER_LEN] = [0x00, 0x00];
pub const LOCAL_PEER_RESPONSE: [u8; HEADER_LEN] = [0x00, 0x01];
pub const PING: [u8; HEADER_LEN] = [0x00, 0x02];
pub const PONG: [u8; HEADER_LEN] = [0x00, 0x03];
pub const FIND_NODE: [u8; HEADER_LEN] = [0x00, 0x04];
pub const FIND_NODE_RESPONSE: [u8; HEADER_LEN] = [0x00, 0x05];
pub const CHAT_MESSAGE: [u8; HEADER_LEN] = [0x00, 0x06];

const ID_PORT_LEN: usize = ID_LEN + 2;
const ID_PAIR_LEN: usize = ID_LEN * 2;

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    LocalPeerRequest {
        id: NodeId,
        port: u16,
    },
    LocalPeerResponse {
        id: NodeId,
        port: u16,
    },
    Ping {
        id: NodeId,
        nonce: Nonce,
    },
    Pong {
        id: NodeId,
        nonce: Nonce,
    },
    FindNode {
        id: NodeId,
        target: NodeId,
    },
    FindNodeResponse {
        id: NodeId,
        target: NodeId,
        peers: Vec<PeerInfo>,
    },
    ChatMessage {
        id: NodeId,
        message: String,
    },
}

impl Packet {
    pub fn name(&self) -> &'static str {
        match self {
            Packet::LocalPeerRequest { .. } => "localPeerRequest",
            Packet::LocalPeerResponse { .. } => "localPeerResponse",
            Packet::Ping { .. } => "ping",
            Packet::Pong { .. } => "pong",
            Packet::FindNode { .. } => "findNode",
            Packet::FindNodeResponse { .. } => "findNodeResponse",
            Packet::ChatMessage { .. } => "chatMessage",
        }
    }

    pub fn header(&self) -> [u8; HEADER_LEN] {
        match self {
            Packet::LocalPeerRequest { .. } => LOCAL_PEER_REQUEST,
            Packet::LocalPeerResponse { .. } => LOCAL_PEER_RESPONSE,
            Packet::Ping { .. } => PING,
            Packet::Pong { .. } => PONG,
            Packet::FindNode { .. } => FIND_NODE,
            Packet::FindNodeResponse { .. } => FIND_NODE_RESPONSE,
            Packet::ChatMessage { .. } => CHAT_MESSAGE,
        }
    }

    /// The id of the node that sent this packet.
    pub fn sender(&self) -> &NodeId {
        match self {
            Packet::LocalPeerRequest { id, .. }
            | Packet::LocalPeerResponse { id, .. }
            | Packet::Ping { id, .. }
            | Packet::Pong { id, .. }
            | Packet::FindNode { id, .. }
            | Packet::FindNodeResponse { id, .. }
            | Packet::ChatMessage { id, .. } => id,
        }
    }

    /// Packets that carry application payload rather than protocol control.
    pub fn is_application(&self) -> bool {
        matches!(self, Packet::ChatMessage { .. })
    }

    pub fn encode(&self) -> Result<Bytes, PacketError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + ID_PAIR_LEN);
        buf.put_slice(&self.header());

        match self {
            Packet::LocalPeerRequest { id, port } | Packet::LocalPeerResponse { id, port } => {
                buf.put_slice(id.as_bytes());
                buf.put_u16(*port);
            }
            Packet::Ping { id, nonce } | Packet::Pong { id, nonce } => {
                buf.put_slice(id.as_bytes());
                buf.put_slice(nonce);
            }
            Packet::FindNode { id, target } => {
                buf.put_slice(id.as_bytes());
                buf.put_slice(target.as_bytes());
            }
            Packet::FindNodeResponse { id, target, peers } => {
                buf.put_slice(id.as_bytes());
                buf.put_slice(target.as_bytes());
                let wire: Vec<WirePeer> = peers.iter().map(WirePeer::from).collect();
                buf.put_slice(&serde_json::to_vec(&wire)?);
            }
            Packet::ChatMessage { id, message } => {
                buf.put_slice(id.as_bytes());
                buf.put_slice(message.as_bytes());
            }
        }

        Ok(buf.freeze())
    }
}

/// Peer list entry as it travels inside a find-node response.
#[derive(Debug, Serialize, Deserialize)]
struct WirePeer {
    id: String,
    port: u16,
    address: String,
}

impl From<&PeerInfo> for WirePeer {
    fn from(peer: &PeerInfo) -> Self {
        Self {
            id: peer.id.to_hex(),
            port: peer.port,
            address: peer.address.clone(),
        }
    }
}

impl TryFrom<WirePeer> for PeerInfo {
    type Error = crate::dht::DhtError;

    fn try_from(wire: WirePeer) -> Result<Self, Self::Error> {
        Ok(PeerInfo::new(NodeId::from_hex(&wire.id)?, wire.address, wire.port))
    }
}

// The decoders below receive the payload that follows the two-byte header.

fn id_at(payload: &[u8], offset: usize) -> Option<NodeId> {
    NodeId::from_bytes(payload.get(offset..offset + ID_LEN)?).ok()
}

fn nonce_at(payload: &[u8], offset: usize) -> Option<Nonce> {
    payload.get(offset..offset + NONCE_LEN)?.try_into().ok()
}

fn id_and_port(payload: &[u8]) -> Option<(NodeId, u16)> {
    if payload.len() != ID_PORT_LEN {
        return None;
    }
    let id = id_at(payload, 0)?;
    let port = u16::from_be_bytes([payload[ID_LEN], payload[ID_LEN + 1]]);
    Some((id, port))
}

fn id_and_nonce(payload: &[u8]) -> Option<(NodeId, Nonce)> {
    if payload.len() != ID_LEN + NONCE_LEN {
        return None;
    }
    Some((id_at(payload, 0)?, nonce_at(payload, ID_LEN)?))
}

pub(super) fn decode_local_peer_request(payload: &[u8]) -> Option<Packet> {
    let (id, port) = id_and_port(payload)?;
    Some(Packet::LocalPeerRequest { id, port })
}

pub(super) fn decode_local_peer_response(payload: &[u8]) -> Option<Packet> {
    let (id, port) = id_and_port(payload)?;
    Some(Packet::LocalPeerResponse { id, port })
}

pub(super) fn decode_ping(payload: &[u8]) -> Option<Packet> {
    let (id, nonce) = id_and_nonce(payload)?;
    Some(Packet::Ping { id, nonce })
}

pub(super) fn decode_pong(payload: &[u8]) -> Option<Packet> {
    let (id, nonce) = id_and_nonce(payload)?;
    Some(Packet::Pong { id, nonce })
}

pub(super) fn decode_find_node(payload: &[u8]) -> Option<Packet> {
    if payload.len() != ID_PAIR_LEN {
        return None;
    }
    Some(Packet::FindNode {
        id: id_at(payload, 0)?,
        target: id_at(payload, ID_LEN)?,
    })
}

pub(super) fn decode_find_node_response(payload: &[u8]) -> Option<Packet> {
    let id = id_at(payload, 0)?;
    let target = id_at(payload, ID_LEN)?;

    let wire: Vec<WirePeer> = serde_json::from_slice(&payload[ID_PAIR_LEN..]).ok()?;
    let peers = wire
        .into_iter()
        .map(PeerInfo::try_from)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    Some(Packet::FindNodeResponse { id, target, peers })
}

pub(super) fn decode_chat_message(payload: &[u8]) -> Option<Packet> {
    let id = id_at(payload, 0)?;
    let message = String::from_utf8_lossy(&payload[ID_LEN..]).into_owned();
    Some(Packet::ChatMessage { id, message })
}
