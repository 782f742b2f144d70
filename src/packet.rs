//! Wire codec for the control messages exchanged between nodes.
//!
//! Every datagram starts with a two-byte type header followed by a
//! kind-specific payload. All integers are big-endian and all identifiers
//! are 20 bytes.
//!
//! | Kind | Header | Payload |
//! |------|--------|---------|
//! | LocalPeerRequest | `0x0000` | id, port |
//! | LocalPeerResponse | `0x0001` | id, port |
//! | Ping | `0x0002` | id, nonce |
//! | Pong | `0x0003` | id, nonce |
//! | FindNode | `0x0004` | sender id, target id |
//! | FindNodeResponse | `0x0005` | sender id, target id, JSON peer list |
//! | ChatMessage | `0x0006` | sender id, UTF-8 text |
//!
//! # Examples
//!
//! ```
//! use kadnet::dht::NodeId;
//! use kadnet::packet::{Codec, Packet};
//!
//! let codec = Codec::new().unwrap();
//! let ping = Packet::Ping { id: NodeId([0u8; 20]), nonce: [7u8; 20] };
//!
//! let bytes = ping.encode().unwrap();
//! assert_eq!(codec.decode(&bytes), Some(ping));
//! assert_eq!(codec.decode(b"\xff\xffgarbage"), None);
//! ```

mod codec;
mod error;
mod message;

pub use codec::{Codec, DecodeFn, PacketKind, KNOWN_KINDS};
pub use error::PacketError;
pub use message::{
    Nonce, Packet, CHAT_MESSAGE, FIND_NODE, FIND_NODE_RESPONSE, LOCAL_PEER_REQUEST,
    LOCAL_PEER_RESPONSE, PING, PONG,
};

#[cfg(test)]
mod tests;
