use super::error::DhtError;
use crate::constants::ID_LEN;
use rand::Rng as _;
use sha1::{Digest, Sha1};
use std::fmt;
use std::net::SocketAddr;

/// A 160-bit node identifier.
///
/// Identifiers have no ordering of their own; they are only ever compared
/// through [`NodeId::distance`] to some target.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; ID_LEN]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; ID_LEN];
        rand::rng().fill(&mut id);
        Self(id)
    }

    /// Derives an identifier from a human readable name (SHA-1 of its bytes).
    pub fn from_name(name: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();

        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&digest);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != ID_LEN {
            return Err(DhtError::InvalidNodeId);
        }
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn from_hex(s: &str) -> Result<Self, DhtError> {
        if s.len() != ID_LEN * 2 {
            return Err(DhtError::InvalidNodeId);
        }
        let bytes = hex_decode(s).ok_or(DhtError::InvalidNodeId)?;
        Self::from_bytes(&bytes)
    }

    /// The identifier that is zero everywhere except at `bit`, counted from
    /// the most significant bit of the first byte.
    pub fn with_bit(bit: usize) -> Self {
        let mut id = [0u8; ID_LEN];
        if bit < ID_LEN * 8 {
            id[bit / 8] = 0x80 >> (bit % 8);
        }
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// XOR distance. Byte arrays compare lexicographically, which is the
    /// same as comparing the distances as big-endian unsigned integers.
    pub fn distance(&self, other: &NodeId) -> [u8; ID_LEN] {
        let mut dist = [0u8; ID_LEN];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        dist
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    /// First four bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex_encode(&self.0[..4])
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", self.short())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A reachable endpoint of a node.
///
/// The address is kept as text because peer lists travel as text on the
/// wire; it is resolved only when something is actually sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
}

impl PeerInfo {
    pub fn new(id: NodeId, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
        }
    }

    /// A peer whose endpoint is the source address of a datagram.
    pub fn from_socket_addr(id: NodeId, addr: SocketAddr) -> Self {
        Self::new(id, addr.ip().to_string(), addr.port())
    }

    pub fn endpoint(&self) -> (&str, u16) {
        (self.address.as_str(), self.port)
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id.short(), self.address, self.port)
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

pub(crate) fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
