//! Construction options for a [`Dht`](crate::dht::Dht).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::constants::{
    BOOTSTRAP_ATTEMPTS, BOOTSTRAP_RETRY_DELAY, BROADCAST_ADDR, DISCOVERY_PORT, DISCOVERY_TIMEOUT,
    PING_INTERVAL, RPC_TIMEOUT,
};
use crate::dht::{NodeId, PeerInfo};

/// Options for starting a node.
///
/// `Default` gives a node with a random id listening on an OS-assigned
/// port that takes part in local discovery on port 1338.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Our identity. A random id is generated when unset.
    pub id: Option<NodeId>,
    /// Peers to seed the address book with.
    pub peers: Vec<PeerInfo>,
    /// Address of the RPC socket.
    pub bind_addr: SocketAddr,
    /// Whether to bind the discovery port and announce on startup.
    pub local_discovery: bool,
    pub discovery_port: u16,
    pub broadcast_addr: Ipv4Addr,
    /// Wait for each ping and find-node reply.
    pub rpc_timeout: Duration,
    /// Wait for each local discovery attempt.
    pub discovery_timeout: Duration,
    pub bootstrap_attempts: usize,
    pub bootstrap_retry_delay: Duration,
    /// Period of the ping sweep over the address book.
    pub ping_interval: Duration,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            id: None,
            peers: Vec::new(),
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            local_discovery: true,
            discovery_port: DISCOVERY_PORT,
            broadcast_addr: BROADCAST_ADDR,
            rpc_timeout: RPC_TIMEOUT,
            discovery_timeout: DISCOVERY_TIMEOUT,
            bootstrap_attempts: BOOTSTRAP_ATTEMPTS,
            bootstrap_retry_delay: BOOTSTRAP_RETRY_DELAY,
            ping_interval: PING_INTERVAL,
        }
    }
}

impl DhtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_peers(mut self, peers: impl IntoIterator<Item = PeerInfo>) -> Self {
        self.peers.extend(peers);
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = port;
        self
    }

    pub fn with_broadcast_addr(mut self, addr: Ipv4Addr) -> Self {
        self.broadcast_addr = addr;
        self
    }

    pub fn without_local_discovery(mut self) -> Self {
        self.local_discovery = false;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_bootstrap_attempts(mut self, attempts: usize) -> Self {
        self.bootstrap_attempts = attempts;
        self
    }

    pub fn with_bootstrap_retry_delay(mut self, delay: Duration) -> Self {
        self.bootstrap_retry_delay = delay;
        self
    }
}
