//! Kademlia-style node discovery.
//!
//! Nodes are named by 160-bit [`NodeId`]s and locate each other with an
//! iterative, XOR-distance guided lookup: ask the closest known peers for
//! the peers *they* know closest to the target, and repeat with the
//! answers until the target turns up or the candidates run out.

mod address_book;
mod error;
mod lookup;
mod node;
mod rpc;
mod server;

pub use address_book::AddressBook;
pub use error::DhtError;
pub use node::{NodeId, PeerInfo};
pub use rpc::{Inbound, RpcServer};
pub use server::Dht;
