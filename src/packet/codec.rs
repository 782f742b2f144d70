use super::error::PacketError;
use super::message::{self, Packet};
use crate::constants::HEADER_LEN;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, trace};

/// Decodes the payload that follows a packet's header.
pub type DecodeFn = fn(&[u8]) -> Option<Packet>;

/// Describes one kind of packet: its name, wire header and decoder.
#[derive(Clone, Copy)]
pub struct PacketKind {
    pub name: &'static str,
    pub header: &'static [u8],
    pub decode: DecodeFn,
}

impl PacketKind {
    pub const fn new(name: &'static str, header: &'static [u8], decode: DecodeFn) -> Self {
        Self {
            name,
            header,
            decode,
        }
    }
}

impl fmt::Debug for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketKind")
            .field("name", &self.name)
            .field("header", &self.header)
            .finish()
    }
}

/// Every packet kind this crate speaks.
pub const KNOWN_KINDS: &[PacketKind] = &[
    PacketKind::new(
        "localPeerRequest",
        &message::LOCAL_PEER_REQUEST,
        message::decode_local_peer_request,
    ),
    PacketKind::new(
        "localPeerResponse",
        &message::LOCAL_PEER_RESPONSE,
        message::decode_local_peer_response,
    ),
    PacketKind::new("ping", &message::PING, message::decode_ping),
    PacketKind::new("pong", &message::PONG, message::decode_pong),
    PacketKind::new("findNode", &message::FIND_NODE, message::decode_find_node),
    PacketKind::new(
        "findNodeResponse",
        &message::FIND_NODE_RESPONSE,
        message::decode_find_node_response,
    ),
    PacketKind::new(
        "chatMessage",
        &message::CHAT_MESSAGE,
        message::decode_chat_message,
    ),
];

/// Header to decoder dispatch table.
///
/// Built once at startup. Construction fails if any header is not exactly
/// two bytes long or if two kinds share a header, so a node never runs with
/// ambiguous framing.
#[derive(Debug, Clone)]
pub struct Codec {
    table: HashMap<[u8; HEADER_LEN], PacketKind>,
}

impl Codec {
    /// The codec for [`KNOWN_KINDS`].
    pub fn new() -> Result<Self, PacketError> {
        Self::with_kinds(KNOWN_KINDS.iter().copied())
    }

    pub fn with_kinds(kinds: impl IntoIterator<Item = PacketKind>) -> Result<Self, PacketError> {
        let mut table: HashMap<[u8; HEADER_LEN], PacketKind> = HashMap::new();

        for kind in kinds {
            let header: [u8; HEADER_LEN] = kind.header.try_into().map_err(|_| {
                PacketError::InvalidHeaderLength {
                    name: kind.name,
                    len: kind.header.len(),
                }
            })?;

            if let Some(prev) = table.get(&header) {
                return Err(PacketError::DuplicateHeader {
                    name: kind.name,
                    other: prev.name,
                });
            }

            table.insert(header, kind);
        }

        Ok(Self { table })
    }

    pub fn kind_count(&self) -> usize {
        self.table.len()
    }

    /// Decodes a datagram, returning `None` for anything unrecognized:
    /// unknown headers, wrong lengths and unparseable peer lists alike.
    pub fn decode(&self, data: &[u8]) -> Option<Packet> {
        if data.len() < HEADER_LEN {
            trace!("datagram too short for a header: {} bytes", data.len());
            return None;
        }

        let header = [data[0], data[1]];
        let Some(kind) = self.table.get(&header) else {
            debug!(
                "no packet kind for header {:02x}{:02x} ({} known)",
                header[0],
                header[1],
                self.table.len()
            );
            return None;
        };

        let packet = (kind.decode)(&data[HEADER_LEN..]);
        if packet.is_none() {
            debug!("malformed {} packet of {} bytes", kind.name, data.len());
        }
        packet
    }
}
