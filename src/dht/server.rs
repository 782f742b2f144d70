use super::address_book::AddressBook;
use super::error::DhtError;
use super::lookup;
use super::node::{NodeId, PeerInfo};
use super::rpc::{Inbound, RpcServer};
use crate::config::DhtConfig;
use crate::constants::{ID_BITS, INBOUND_CHANNEL_CAPACITY, K};
use crate::lsd::LocalDiscovery;
use crate::packet::{Codec, Packet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

struct Inner {
    id: NodeId,
    config: DhtConfig,
    address_book: AddressBook,
    rpc: RpcServer,
    discovery: Option<LocalDiscovery>,
    messages_tx: broadcast::Sender<Inbound>,
}

impl Inner {
    fn add_peer(&self, peer: PeerInfo) -> bool {
        let added = self.address_book.insert(peer.clone());
        if added {
            debug!("added peer {} ({} known)", peer, self.address_book.len());
        }
        added
    }

    fn local_peer(&self) -> PeerInfo {
        PeerInfo::from_socket_addr(self.id, self.rpc.local_addr())
    }

    async fn find_peer(&self, target: NodeId) -> Option<PeerInfo> {
        if target == self.id {
            return Some(self.local_peer());
        }
        if let Some(peer) = self.address_book.get(&target) {
            return Some(peer);
        }
        self.lookup(target).await
    }

    async fn lookup(&self, target: NodeId) -> Option<PeerInfo> {
        let wait = self.config.rpc_timeout;
        lookup::find_peer(&self.address_book, target, move |peer| async move {
            self.rpc.find_node(&peer, target, wait).await
        })
        .await
    }

    async fn discover_local_peers(&self) {
        let Some(discovery) = &self.discovery else {
            return;
        };

        let attempts = self.config.bootstrap_attempts;
        for attempt in 1..=attempts {
            if !self.address_book.is_empty() {
                break;
            }

            match discovery.find_one(self.config.discovery_timeout).await {
                Ok(Some(peer)) => {
                    self.add_peer(peer);
                    continue;
                }
                Ok(None) => debug!("no local peers answered (attempt {}/{})", attempt, attempts),
                Err(e) => warn!("local discovery attempt {}/{} failed: {}", attempt, attempts, e),
            }

            if attempt < attempts {
                sleep(self.config.bootstrap_retry_delay).await;
            }
        }
    }

    /// Walks one target per distance ring, each with a single bit set, to
    /// spread the address book across the whole id space.
    async fn probe_address_space(&self) {
        for bit in 0..ID_BITS {
            let target = NodeId::with_bit(bit);
            if self.find_peer(target).await.is_some() {
                debug!("probe {} hit an existing node", bit);
            }
        }
    }

    async fn bootstrap(&self) {
        info!("bootstrapping node {}", self.id.short());

        self.discover_local_peers().await;
        // Bypasses the own-id shortcut of find_peer so the network is asked.
        self.lookup(self.id).await;
        self.probe_address_space().await;

        info!(
            "bootstrap complete, {} peers in address book",
            self.address_book.len()
        );
    }

    async fn ping_peers(&self) {
        for peer in self.address_book.peers() {
            if let Err(e) = self.rpc.ping(&peer, self.config.rpc_timeout).await {
                warn!("ping {} failed: {}", peer, e);
            }
        }
    }

    async fn handle_inbound(&self, inbound: Inbound) {
        let Inbound { from, packet } = inbound;

        match packet {
            // The rpc server has already answered with a pong.
            Packet::Ping { id, .. } => {
                self.add_peer(PeerInfo::from_socket_addr(id, from));
            }
            Packet::FindNode { id, target } => {
                self.add_peer(PeerInfo::from_socket_addr(id, from));

                let peers = self.address_book.closest(&target, K);
                debug!(
                    "answering find_node {} from {} with {} peers",
                    target.short(),
                    id.short(),
                    peers.len()
                );
                let response = Packet::FindNodeResponse {
                    id: self.id,
                    target,
                    peers,
                };
                if let Err(e) = self.rpc.send_to(&response, from).await {
                    warn!("failed to answer find_node from {}: {}", from, e);
                }
            }
            packet if packet.is_application() => {
                let _ = self.messages_tx.send(Inbound { from, packet });
            }
            _ => {}
        }
    }

    async fn serve(
        self: Arc<Self>,
        mut inbound: broadcast::Receiver<Inbound>,
        mut discovered: Option<broadcast::Receiver<PeerInfo>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = inbound.recv() => match result {
                    Ok(msg) => self.handle_inbound(msg).await,
                    Err(RecvError::Lagged(n)) => warn!("dropped {} inbound packets", n),
                    Err(RecvError::Closed) => break,
                },
                result = next_discovered(&mut discovered) => match result {
                    Ok(peer) => {
                        self.add_peer(peer);
                    }
                    Err(RecvError::Lagged(n)) => debug!("dropped {} discovery events", n),
                    Err(RecvError::Closed) => discovered = None,
                },
            }
        }

        debug!("dht serve loop stopped");
    }

    async fn run_bootstrap(
        self: Arc<Self>,
        done: watch::Sender<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tokio::select! {
            _ = shutdown.changed() => debug!("bootstrap interrupted by shutdown"),
            _ = self.bootstrap() => {}
        }
        let _ = done.send(true);
    }

    async fn run_ping_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.ping_peers().await,
            }
        }
    }
}

async fn next_discovered(
    discovered: &mut Option<broadcast::Receiver<PeerInfo>>,
) -> Result<PeerInfo, RecvError> {
    match discovered {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// A running DHT node.
///
/// Owns the RPC socket, the local discovery socket and the address book.
/// Starting a node spawns three background tasks: one serving inbound
/// requests, one running the bootstrap sequence and one pinging known peers
/// every few seconds. All of them end on [`Dht::stop`] or when the node is
/// dropped.
///
/// # Examples
///
/// ```no_run
/// use kadnet::config::DhtConfig;
/// use kadnet::dht::{Dht, NodeId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dht = Dht::connect(DhtConfig::new().with_id(NodeId::from_name("alice"))).await?;
/// dht.bootstrapped().await;
///
/// if let Some(peer) = dht.find_peer(NodeId::from_name("bob")).await {
///     dht.send_chat(&peer, "hello bob").await?;
/// }
///
/// dht.stop();
/// # Ok(())
/// # }
/// ```
pub struct Dht {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    bootstrapped_rx: watch::Receiver<bool>,
}

impl Dht {
    /// Starts a node. Bootstrap runs in the background; await
    /// [`Dht::bootstrapped`] to wait for it.
    ///
    /// Fails if the packet codec is misconfigured or the RPC socket cannot
    /// be bound. A discovery port that cannot be bound only disables local
    /// discovery.
    pub async fn connect(config: DhtConfig) -> Result<Self, DhtError> {
        let codec = Arc::new(Codec::new()?);
        let id = config.id.unwrap_or_else(NodeId::generate);

        let rpc = RpcServer::bind(config.bind_addr, id, codec.clone()).await?;

        let discovery = if config.local_discovery {
            match LocalDiscovery::bind_with(
                id,
                rpc.port(),
                config.discovery_port,
                config.broadcast_addr,
                codec,
            )
            .await
            {
                Ok(discovery) => Some(discovery),
                Err(e) => {
                    warn!("local discovery unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let address_book = AddressBook::new(id);
        for peer in &config.peers {
            address_book.insert(peer.clone());
        }

        let (messages_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (bootstrapped_tx, bootstrapped_rx) = watch::channel(false);

        // Subscribe before anything is spawned so no early packet is missed.
        let inbound = rpc.subscribe();
        let discovered = discovery.as_ref().map(LocalDiscovery::subscribe);

        let inner = Arc::new(Inner {
            id,
            config,
            address_book,
            rpc,
            discovery,
            messages_tx,
        });

        info!(
            "dht node {} listening on {}",
            id,
            inner.rpc.local_addr()
        );

        tokio::spawn(inner.clone().serve(inbound, discovered, shutdown_rx.clone()));
        tokio::spawn(inner.clone().run_bootstrap(bootstrapped_tx, shutdown_rx.clone()));
        tokio::spawn(inner.clone().run_ping_sweep(shutdown_rx));

        Ok(Self {
            inner,
            shutdown_tx,
            bootstrapped_rx,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.rpc.local_addr()
    }

    /// Address of the local discovery socket, if discovery is running.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.inner.discovery.as_ref().map(LocalDiscovery::local_addr)
    }

    /// This node built from the RPC socket's bound address.
    ///
    /// With the default `0.0.0.0:0` bind address the result carries the
    /// unspecified address `0.0.0.0`, which other hosts cannot reach. Bind a
    /// concrete interface address when the result is handed to other nodes.
    pub fn local_peer(&self) -> PeerInfo {
        self.inner.local_peer()
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.inner.address_book
    }

    /// Records `peer` unless its id is already known. Returns whether it
    /// was new.
    pub fn add_peer(&self, peer: PeerInfo) -> bool {
        self.inner.add_peer(peer)
    }

    /// Up to 20 known peers ordered by XOR distance to `target`.
    pub fn closest_peers(&self, target: &NodeId) -> Vec<PeerInfo> {
        self.inner.address_book.closest(target, K)
    }

    /// Locates `target`, asking the network if it is not already known.
    /// Returns `None` when no reachable node knows it.
    ///
    /// Looking up our own id returns [`Dht::local_peer`], including its
    /// bind address caveat.
    pub async fn find_peer(&self, target: NodeId) -> Option<PeerInfo> {
        self.inner.find_peer(target).await
    }

    pub async fn ping(&self, peer: &PeerInfo) -> Result<(), DhtError> {
        self.inner.rpc.ping(peer, self.inner.config.rpc_timeout).await
    }

    pub async fn send_chat(&self, peer: &PeerInfo, message: &str) -> Result<(), DhtError> {
        self.inner.rpc.send_chat(peer, message).await
    }

    /// Stream of application packets (chat messages) sent to this node.
    pub fn messages(&self) -> broadcast::Receiver<Inbound> {
        self.inner.messages_tx.subscribe()
    }

    /// Resolves once the bootstrap sequence has finished or the node has
    /// been stopped.
    pub async fn bootstrapped(&self) {
        let mut rx = self.bootstrapped_rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_bootstrapped(&self) -> bool {
        *self.bootstrapped_rx.borrow()
    }

    /// Stops the background tasks and both sockets. Calls made afterwards
    /// fail with [`DhtError::Stopped`] instead of touching the network.
    pub fn stop(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        info!("stopping dht node {}", self.inner.id.short());
        self.inner.rpc.stop();
        if let Some(discovery) = &self.inner.discovery {
            discovery.stop();
        }
    }
}

impl Drop for Dht {
    fn drop(&mut self) {
        self.stop();
    }
}
