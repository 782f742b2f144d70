//! Local peer discovery over UDP broadcast.
//!
//! Every node binds the same well-known port and broadcasts a
//! `LocalPeerRequest` carrying its id and RPC port. Nodes that hear it
//! reply directly with a `LocalPeerResponse`, and each response is
//! published as a discovered [`PeerInfo`].
//!
//! # Protocol
//!
//! - Port: `1338` on every node
//! - Announce destination: `255.255.255.255:1338`
//! - Requests carrying our own id are ignored
//!
//! # Examples
//!
//! ```no_run
//! use kadnet::dht::NodeId;
//! use kadnet::lsd::LocalDiscovery;
//! use kadnet::packet::Codec;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let codec = Arc::new(Codec::new()?);
//! let discovery = LocalDiscovery::bind(NodeId::generate(), 6000, codec).await?;
//!
//! if let Some(peer) = discovery.find_one(Duration::from_millis(500)).await? {
//!     println!("found local peer {}", peer);
//! }
//! # Ok(())
//! # }
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::constants::{
    BROADCAST_ADDR, DISCOVERY_CHANNEL_CAPACITY, DISCOVERY_PORT, MAX_DATAGRAM_SIZE,
};
use crate::dht::{NodeId, PeerInfo};
use crate::packet::{Codec, Packet, PacketError};

/// Errors that can occur during local discovery.
#[derive(Debug, Error)]
pub enum LsdError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet could not be encoded.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// The service has been stopped.
    #[error("local discovery stopped")]
    Stopped,
}

struct Shared {
    /// Emptied by `stop` so the well-known port is released.
    socket: Mutex<Option<Arc<UdpSocket>>>,
    id: NodeId,
    rpc_port: u16,
    codec: Arc<Codec>,
    peer_tx: broadcast::Sender<PeerInfo>,
}

impl Shared {
    fn socket(&self) -> Result<Arc<UdpSocket>, LsdError> {
        self.socket.lock().clone().ok_or(LsdError::Stopped)
    }

    async fn send(&self, packet: &Packet, dest: SocketAddr) -> Result<(), LsdError> {
        let data = packet.encode()?;
        self.socket()?.send_to(&data, dest).await?;
        Ok(())
    }

    async fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        let Some(packet) = self.codec.decode(data) else {
            debug!("dropping unrecognized discovery datagram from {}", source);
            return;
        };

        trace!(
            "discovery received {} from {} at {}",
            packet.name(),
            packet.sender().short(),
            source
        );

        match packet {
            Packet::LocalPeerRequest { id, port } => {
                if id == self.id {
                    trace!("ignoring our own announce");
                    return;
                }

                self.publish(PeerInfo::new(id, source.ip().to_string(), port));

                let response = Packet::LocalPeerResponse {
                    id: self.id,
                    port: self.rpc_port,
                };
                debug!("answering local peer request from {}", source);
                if let Err(e) = self.send(&response, source).await {
                    warn!("failed to answer local peer request from {}: {}", source, e);
                }
            }
            Packet::LocalPeerResponse { id, port } => {
                if id == self.id {
                    return;
                }
                self.publish(PeerInfo::new(id, source.ip().to_string(), port));
            }
            other => debug!("unexpected {} on discovery port from {}", other.name(), source),
        }
    }

    fn publish(&self, peer: PeerInfo) {
        debug!("discovered local peer {}", peer);
        let _ = self.peer_tx.send(peer);
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Ok(socket) = self.socket() else {
            return;
        };
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, source)) => self.handle_datagram(&buf[..n], source).await,
                        Err(e) => debug!("discovery recv error: {}", e),
                    }
                }
            }
        }

        debug!("local discovery receive loop stopped");
    }
}

/// Local discovery service.
///
/// Owns the broadcast socket and publishes every peer that answers (or
/// sends) an announce.
pub struct LocalDiscovery {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    broadcast: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl LocalDiscovery {
    /// Binds the well-known discovery port and announces to the subnet
    /// broadcast address.
    pub async fn bind(id: NodeId, rpc_port: u16, codec: Arc<Codec>) -> Result<Self, LsdError> {
        Self::bind_with(id, rpc_port, DISCOVERY_PORT, BROADCAST_ADDR, codec).await
    }

    /// Binds `port` on all interfaces; announces go to `broadcast_addr` on
    /// the same port.
    pub async fn bind_with(
        id: NodeId,
        rpc_port: u16,
        port: u16,
        broadcast_addr: Ipv4Addr,
        codec: Arc<Codec>,
    ) -> Result<Self, LsdError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        let local_port = local_addr.port();

        info!("local discovery listening on port {}", local_port);

        let (peer_tx, _) = broadcast::channel(DISCOVERY_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            socket: Mutex::new(Some(Arc::new(socket))),
            id,
            rpc_port,
            codec,
            peer_tx,
        });

        tokio::spawn(shared.clone().run(shutdown_rx));

        Ok(Self {
            shared,
            local_addr,
            broadcast: SocketAddr::V4(SocketAddrV4::new(broadcast_addr, local_port)),
            shutdown_tx,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stream of discovered peers. Every response produces an event, so the
    /// same peer may appear many times.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerInfo> {
        self.shared.peer_tx.subscribe()
    }

    /// Broadcasts our id and RPC port.
    pub async fn announce(&self) -> Result<(), LsdError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(LsdError::Stopped);
        }

        debug!("announcing to {}", self.broadcast);
        let request = Packet::LocalPeerRequest {
            id: self.shared.id,
            port: self.shared.rpc_port,
        };
        self.shared.send(&request, self.broadcast).await
    }

    /// Announces once and waits for the first discovered peer.
    pub async fn find_one(&self, wait: Duration) -> Result<Option<PeerInfo>, LsdError> {
        // Subscribe first so a quick answer is not missed.
        let mut rx = self.subscribe();
        self.announce().await?;

        let result = timeout(wait, async {
            loop {
                match rx.recv().await {
                    Ok(peer) => return Some(peer),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;

        Ok(result.ok().flatten())
    }

    /// Stops the receive loop and releases the discovery port.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stopping local discovery on port {}", self.local_addr.port());
        self.shared.socket.lock().take();
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for LocalDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_local(id: NodeId, rpc_port: u16) -> LocalDiscovery {
        let codec = Arc::new(Codec::new().unwrap());
        LocalDiscovery::bind_with(id, rpc_port, 0, Ipv4Addr::LOCALHOST, codec)
            .await
            .unwrap()
    }

    fn loopback(discovery: &LocalDiscovery) -> SocketAddr {
        let port = discovery.local_addr().port();
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[tokio::test]
    async fn test_request_gets_response() {
        let responder_id = NodeId::generate();
        let responder = bind_local(responder_id, 4000).await;
        let mut responder_rx = responder.subscribe();

        let asker_id = NodeId::generate();
        let asker = bind_local(asker_id, 5000).await;
        let mut asker_rx = asker.subscribe();

        let request = Packet::LocalPeerRequest {
            id: asker_id,
            port: 5000,
        };
        asker.shared.send(&request, loopback(&responder)).await.unwrap();

        let peer = timeout(Duration::from_secs(2), asker_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer.id, responder_id);
        assert_eq!(peer.port, 4000);
        assert_eq!(peer.address, "127.0.0.1");

        let requester = timeout(Duration::from_secs(2), responder_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(requester.id, asker_id);
        assert_eq!(requester.port, 5000);
    }

    #[tokio::test]
    async fn test_own_announce_is_ignored() {
        // Announces go to our own port on loopback, so we hear ourselves.
        let discovery = bind_local(NodeId::generate(), 4000).await;
        let found = discovery.find_one(Duration::from_millis(200)).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_find_one_returns_first_peer() {
        let responder_id = NodeId::generate();
        let responder = bind_local(responder_id, 4100).await;

        let mut asker = bind_local(NodeId::generate(), 5100).await;
        asker.broadcast = loopback(&responder);

        let found = asker.find_one(Duration::from_secs(2)).await.unwrap();
        let peer = found.expect("responder should answer");
        assert_eq!(peer.id, responder_id);
        assert_eq!(peer.port, 4100);
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let discovery = bind_local(NodeId::generate(), 4200).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket
            .send_to(b"\xff\xffnot a packet", loopback(&discovery))
            .await
            .unwrap();

        // Still serving afterwards.
        let mut rx = discovery.subscribe();
        let response = Packet::LocalPeerResponse {
            id: NodeId::generate(),
            port: 7,
        };
        socket
            .send_to(&response.encode().unwrap(), loopback(&discovery))
            .await
            .unwrap();
        let peer = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer.port, 7);
    }

    #[tokio::test]
    async fn test_announce_after_stop() {
        let discovery = bind_local(NodeId::generate(), 4300).await;
        discovery.stop();
        assert!(matches!(discovery.announce().await, Err(LsdError::Stopped)));
        discovery.stop();
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let discovery = bind_local(NodeId::generate(), 4400).await;
        let port = discovery.local_addr().port();
        discovery.stop();

        let mut rebound = None;
        for _ in 0..100 {
            let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
            if let Ok(socket) = UdpSocket::bind(addr).await {
                rebound = Some(socket);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rebound.is_some(), "port {} still bound after stop", port);
    }
}
