//! kadnet - peer-to-peer node discovery over UDP
//!
//! A small Kademlia-style distributed hash table: nodes find neighbours on
//! the local network by broadcast, then locate any node in the 160-bit id
//! space through iterative `find_node` lookups against other nodes'
//! address books.
//!
//! # Modules
//!
//! - [`packet`] - Binary wire codec for every control message
//! - [`dht`] - Node ids, address book, RPC transport, lookup and the node itself
//! - [`lsd`] - Local peer discovery over UDP broadcast
//! - [`config`] - Node construction options
//! - [`constants`] - Protocol constants and tuning parameters

pub mod config;
pub mod constants;
pub mod dht;
pub mod lsd;
pub mod packet;

pub use config::DhtConfig;
pub use dht::{AddressBook, Dht, DhtError, Inbound, NodeId, PeerInfo, RpcServer};
pub use lsd::{LocalDiscovery, LsdError};
pub use packet::{Codec, Packet, PacketError, PacketKind};
