use super::error::DhtError;
use super::node::{NodeId, PeerInfo};
use crate::constants::{INBOUND_CHANNEL_CAPACITY, MAX_DATAGRAM_SIZE};
use crate::packet::{Codec, Nonce, Packet};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// A decoded datagram together with the address it came from.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: SocketAddr,
    pub packet: Packet,
}

/// What a reply must carry to complete an outstanding call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CallKey {
    Pong { peer: NodeId, nonce: Nonce },
    FindNode { peer: NodeId, target: NodeId },
}

impl CallKey {
    fn for_reply(packet: &Packet) -> Option<Self> {
        match packet {
            Packet::Pong { id, nonce } => Some(CallKey::Pong {
                peer: *id,
                nonce: *nonce,
            }),
            Packet::FindNodeResponse { id, target, .. } => Some(CallKey::FindNode {
                peer: *id,
                target: *target,
            }),
            _ => None,
        }
    }
}

/// Outstanding calls waiting for their reply.
///
/// Several calls may wait on the same key; a matching reply completes all
/// of them.
#[derive(Default)]
struct PendingCalls {
    next_call: AtomicU64,
    calls: Mutex<HashMap<CallKey, Vec<(u64, oneshot::Sender<Packet>)>>>,
}

impl PendingCalls {
    fn register(self: &Arc<Self>, key: CallKey) -> (PendingGuard, oneshot::Receiver<Packet>) {
        let call = self.next_call.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.calls.lock().entry(key).or_default().push((call, tx));

        let guard = PendingGuard {
            pending: self.clone(),
            key,
            call,
        };
        (guard, rx)
    }

    fn resolve(&self, packet: &Packet) -> bool {
        let Some(key) = CallKey::for_reply(packet) else {
            return false;
        };

        let waiters = self.calls.lock().remove(&key);
        match waiters {
            Some(waiters) => {
                for (_, tx) in waiters {
                    let _ = tx.send(packet.clone());
                }
                true
            }
            None => false,
        }
    }

    fn remove(&self, key: &CallKey, call: u64) {
        let mut calls = self.calls.lock();
        if let Some(waiters) = calls.get_mut(key) {
            waiters.retain(|(id, _)| *id != call);
            if waiters.is_empty() {
                calls.remove(key);
            }
        }
    }

    fn len(&self) -> usize {
        self.calls.lock().values().map(Vec::len).sum()
    }

    fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Removes a call's registration however the call ends: reply, timeout,
/// or the caller dropping the future.
struct PendingGuard {
    pending: Arc<PendingCalls>,
    key: CallKey,
    call: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.key, self.call);
    }
}

struct Shared {
    /// Taken on stop; the socket closes once the receive loop lets go of it.
    socket: Mutex<Option<Arc<UdpSocket>>>,
    id: NodeId,
    codec: Arc<Codec>,
    pending: Arc<PendingCalls>,
    inbound_tx: broadcast::Sender<Inbound>,
}

impl Shared {
    fn socket(&self) -> Result<Arc<UdpSocket>, DhtError> {
        self.socket.lock().clone().ok_or(DhtError::Stopped)
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let Some(packet) = self.codec.decode(data) else {
            debug!("dropping unrecognized datagram of {} bytes from {}", data.len(), from);
            return;
        };

        trace!(
            "received {} from {} at {}",
            packet.name(),
            packet.sender().short(),
            from
        );

        match &packet {
            Packet::Ping { id, nonce } => {
                let pong = Packet::Pong {
                    id: self.id,
                    nonce: *nonce,
                };
                debug!("answering ping from {} at {}", id.short(), from);
                if let Err(e) = self.send_packet(&pong, from).await {
                    warn!("failed to send pong to {}: {}", from, e);
                }
            }
            Packet::Pong { .. } | Packet::FindNodeResponse { .. } => {
                if !self.pending.resolve(&packet) {
                    trace!("discarding unmatched {} from {}", packet.name(), from);
                }
            }
            _ => {}
        }

        // Nobody listening is fine.
        let _ = self.inbound_tx.send(Inbound { from, packet });
    }

    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) -> Result<(), DhtError> {
        let data = packet.encode()?;
        self.socket()?.send_to(&data, addr).await?;
        Ok(())
    }

    async fn send_to_peer(&self, packet: &Packet, peer: &PeerInfo) -> Result<(), DhtError> {
        let data: Bytes = packet.encode()?;
        self.socket()?.send_to(&data, peer.endpoint()).await?;
        Ok(())
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
                        Ok((n, from)) => self.handle_datagram(&buf[..n], from).await,
                        // ICMP errors surface here on some platforms; the socket stays usable.
                        Err(e) => debug!("rpc recv error: {}", e),
                    }
                }
            }
        }

        debug!("rpc server receive loop stopped");
    }
}

/// Request/response layer over one UDP socket.
///
/// Inbound datagrams are decoded and published on a broadcast stream;
/// pongs and find-node responses additionally complete the outstanding
/// call they match. Pings are answered automatically.
pub struct RpcServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl RpcServer {
    /// Binds `addr` and starts the receive loop. Must be called from within
    /// a Tokio runtime.
    pub async fn bind(addr: SocketAddr, id: NodeId, codec: Arc<Codec>) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        info!("rpc server bound to {} with id {}", local_addr, id);

        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            socket: Mutex::new(Some(Arc::new(socket))),
            id,
            codec,
            pending: Arc::new(PendingCalls::default()),
            inbound_tx,
        });

        tokio::spawn(shared.clone().run(shutdown_rx));

        Ok(Self {
            shared,
            local_addr,
            shutdown_tx,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.shared.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stream of every packet this server decodes.
    pub fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.shared.inbound_tx.subscribe()
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), DhtError> {
        if self.is_stopped() {
            return Err(DhtError::Stopped);
        }
        Ok(())
    }

    /// Pings `peer` with a fresh nonce and waits for the matching pong.
    pub async fn ping(&self, peer: &PeerInfo, wait: Duration) -> Result<(), DhtError> {
        self.ensure_running()?;

        let nonce: Nonce = rand::random();
        let key = CallKey::Pong {
            peer: peer.id,
            nonce,
        };
        let packet = Packet::Ping {
            id: self.shared.id,
            nonce,
        };

        debug!("ping {}", peer);
        self.call(peer, key, &packet, wait).await?;
        debug!("pong from {}", peer);
        Ok(())
    }

    /// Asks `peer` for the peers it knows closest to `target`.
    pub async fn find_node(
        &self,
        peer: &PeerInfo,
        target: NodeId,
        wait: Duration,
    ) -> Result<Vec<PeerInfo>, DhtError> {
        self.ensure_running()?;

        let key = CallKey::FindNode {
            peer: peer.id,
            target,
        };
        let packet = Packet::FindNode {
            id: self.shared.id,
            target,
        };

        trace!("find_node {} via {}", target.short(), peer);
        match self.call(peer, key, &packet, wait).await? {
            Packet::FindNodeResponse { peers, .. } => Ok(peers),
            other => Err(DhtError::UnexpectedReply(other.name())),
        }
    }

    /// Sends a chat message to `peer`. Delivery is not acknowledged.
    pub async fn send_chat(&self, peer: &PeerInfo, message: &str) -> Result<(), DhtError> {
        self.ensure_running()?;

        let packet = Packet::ChatMessage {
            id: self.shared.id,
            message: message.to_string(),
        };
        self.shared.send_to_peer(&packet, peer).await
    }

    /// Sends an arbitrary packet to `addr`.
    pub async fn send_to(&self, packet: &Packet, addr: SocketAddr) -> Result<(), DhtError> {
        self.ensure_running()?;
        self.shared.send_packet(packet, addr).await
    }

    async fn call(
        &self,
        peer: &PeerInfo,
        key: CallKey,
        packet: &Packet,
        wait: Duration,
    ) -> Result<Packet, DhtError> {
        // Register before sending so a fast reply cannot slip past us.
        let (_guard, rx) = self.shared.pending.register(key);
        self.shared.send_to_peer(packet, peer).await?;

        match timeout(wait, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The sender is dropped when the server stops.
            Ok(Err(_)) | Err(_) => {
                debug!("{} to {} timed out", packet.name(), peer);
                Err(DhtError::Timeout { peer: peer.id })
            }
        }
    }

    /// Stops the receive loop and releases the socket, so the address can
    /// be bound again once the loop has exited. Calls still waiting fail
    /// with a timeout and replies that arrive afterwards are ignored.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("stopping rpc server on {}", self.local_addr);
        self.shared.socket.lock().take();
        let _ = self.shutdown_tx.send(true);
        self.shared.pending.clear();
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}
