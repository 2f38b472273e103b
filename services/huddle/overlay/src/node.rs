//! The shared overlay-node core.
//!
//! An [`OverlayNode`] owns a peer table, optionally an acceptor loop, and
//! the send/broadcast/remove primitives every topology needs. What happens
//! on connect and on each message is supplied by a [`TopologyPolicy`]; the
//! star and mesh flavors plug in different policies instead of subclassing
//! anything.

use async_trait::async_trait;
use huddle_session::{
    connect_tcp, listen_tcp, send_shared, split_stream, ConnectionListener, ListenerConfig,
    MessageHandler, SharedWriter,
};
use huddle_wire::{Endpoint, PeerMessage, DEFAULT_USERNAME};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Topology-specific behavior plugged into an [`OverlayNode`].
#[async_trait]
pub trait TopologyPolicy: Send + Sync + 'static {
    /// An inbound connection was accepted and registered.
    /// `roster_at_accept` is the set of peers with a known listen endpoint
    /// as it was immediately before the newcomer was registered.
    async fn on_peer_connected(
        &self,
        node: &OverlayNode,
        peer: SocketAddr,
        roster_at_accept: Vec<Endpoint>,
    ) {
        let _ = (node, peer, roster_at_accept);
    }

    /// A valid peer message arrived (anything but a listen-port
    /// announcement).
    async fn on_message(&self, node: &OverlayNode, peer: SocketAddr, msg: PeerMessage) {
        let _ = (node, peer, msg);
    }

    /// The peer announced the port it accepts inbound connections on.
    async fn on_peer_registered_port(&self, node: &OverlayNode, peer: SocketAddr, listen_port: u16) {
        let _ = (node, listen_port);
        debug!("ignoring listen port announcement from {}", peer);
    }
}

/// Everything the node knows about one connected neighbor.
struct PeerInfo {
    writer: SharedWriter,
    listener: ConnectionListener,
    username: String,
    warnings: u32,
    /// Port this peer accepts inbound connections on; known at creation
    /// for dialed peers, learned via REGISTER_PORT for accepted ones.
    advertised_port: Option<u16>,
}

/// Read-only view of a peer table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    /// Address of the TCP connection with this peer
    pub addr: SocketAddr,
    /// Self-reported display name, or the default sentinel
    pub username: String,
    /// Moderation warnings issued so far (star hosts only)
    pub warnings: u32,
    /// Listen port, if this peer announced or implied one
    pub advertised_port: Option<u16>,
}

/// A process's participation in one meeting's P2P network.
pub struct OverlayNode {
    username: String,
    welcome: String,
    policy: Arc<dyn TopologyPolicy>,
    peers: RwLock<HashMap<SocketAddr, PeerInfo>>,
    listen_port: OnceLock<u16>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    me: Weak<OverlayNode>,
}

impl OverlayNode {
    /// Create a node that is not yet listening for peers.
    pub fn new(
        username: impl Into<String>,
        welcome: impl Into<String>,
        policy: Arc<dyn TopologyPolicy>,
    ) -> Arc<Self> {
        let username = username.into();
        let welcome = welcome.into();
        Arc::new_cyclic(|me| Self {
            username,
            welcome,
            policy,
            peers: RwLock::new(HashMap::new()),
            listen_port: OnceLock::new(),
            accept_task: StdMutex::new(None),
            me: me.clone(),
        })
    }

    /// This node's own display name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The text announced to every newly connected peer.
    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    /// The port the acceptor is bound to, once it is running.
    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port.get().copied()
    }

    /// Bind `port` (0 picks a free one) and start accepting peer
    /// connections. Returns the port actually bound. Failure to bind is
    /// fatal to the caller.
    pub async fn start_acceptor(&self, port: u16) -> anyhow::Result<u16> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let listener = listen_tcp(addr).await?;
        let bound = listener.local_addr()?.port();
        let _ = self.listen_port.set(bound);
        info!("'{}' accepting peers on port {}", self.username, bound);

        let weak = self.me.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("accepted peer connection from {}", peer);
                        let Some(node) = weak.upgrade() else {
                            break;
                        };
                        tokio::spawn(node.handle_accept(stream, peer));
                    }
                    Err(e) => {
                        warn!("peer accept error: {}; stopping acceptor", e);
                        break;
                    }
                }
            }
        });

        let mut slot = match self.accept_task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(task);
        Ok(bound)
    }

    async fn handle_accept(self: Arc<Self>, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let (reader, writer) = split_stream(stream);

        // announce ourselves before anything else
        let hello = PeerMessage::register_username(&self.username);
        if let Err(e) = send_shared(&writer, &hello).await {
            warn!("greeting {} failed: {:#}", peer, e);
        }
        if let Err(e) = send_shared(&writer, &PeerMessage::text(&self.welcome)).await {
            warn!("welcome to {} failed: {:#}", peer, e);
        }

        // membership as it stands at accept time, before the newcomer
        let roster_at_accept = self.advertised_roster().await;

        self.register_peer(peer, reader, writer, None).await;

        let policy = self.policy.clone();
        policy
            .on_peer_connected(&self, peer, roster_at_accept)
            .await;
    }

    /// Dial `endpoint` and register the resulting connection. The dialed
    /// port doubles as the peer's advertised listen port.
    pub async fn connect_to(&self, endpoint: SocketAddr) -> anyhow::Result<SocketAddr> {
        let stream = connect_tcp(endpoint).await?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = split_stream(stream);
        self.register_peer(peer, reader, writer, Some(endpoint.port()))
            .await;
        Ok(peer)
    }

    async fn register_peer(
        &self,
        peer: SocketAddr,
        reader: OwnedReadHalf,
        writer: SharedWriter,
        advertised_port: Option<u16>,
    ) {
        let Some(node) = self.me.upgrade() else {
            debug!("node is shutting down; dropping connection from {}", peer);
            return;
        };

        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer) {
            error!("already have a peer connection with {}", peer);
            return;
        }

        let handler = PeerHandler { node, peer };
        let listener = ConnectionListener::spawn(reader, ListenerConfig::default(), handler);
        peers.insert(
            peer,
            PeerInfo {
                writer,
                listener,
                username: DEFAULT_USERNAME.to_string(),
                warnings: 0,
                advertised_port,
            },
        );
    }

    /// Send a control message to one peer. Unknown peers and send
    /// failures are logged, nothing more.
    pub async fn send_to(&self, peer: SocketAddr, msg: &PeerMessage) {
        let writer = self.peers.read().await.get(&peer).map(|p| p.writer.clone());
        match writer {
            Some(writer) => {
                if let Err(e) = send_shared(&writer, msg).await {
                    warn!("send to {} failed: {:#}", peer, e);
                }
            }
            None => error!("unknown peer {} (send_to)", peer),
        }
    }

    /// Send a text message to one peer.
    pub async fn direct_message(&self, peer: SocketAddr, text: &str) {
        self.send_to(peer, &PeerMessage::text(text)).await;
    }

    /// Send a text message to the first peer carrying `username`.
    /// Display names are self-reported and not deduplicated, so this is a
    /// convenience, not an identity.
    pub async fn direct_message_username(&self, username: &str, text: &str) {
        let target = self
            .peers
            .read()
            .await
            .iter()
            .find(|(_, info)| info.username == username)
            .map(|(addr, _)| *addr);
        match target {
            Some(addr) => self.direct_message(addr, text).await,
            None => error!("no peer with username '{}'", username),
        }
    }

    /// Send a text message to every connected peer.
    pub async fn broadcast(&self, text: &str) {
        let targets: Vec<(SocketAddr, SharedWriter)> = self
            .peers
            .read()
            .await
            .iter()
            .map(|(addr, info)| (*addr, info.writer.clone()))
            .collect();

        let msg = PeerMessage::text(text);
        for (addr, writer) in targets {
            if let Err(e) = send_shared(&writer, &msg).await {
                warn!("broadcast to {} failed: {:#}", addr, e);
            }
        }
    }

    /// Record a peer's self-reported display name.
    pub async fn set_username(&self, peer: SocketAddr, username: &str) {
        match self.peers.write().await.get_mut(&peer) {
            Some(info) => {
                debug!("{} is now known as '{}'", peer, username);
                info.username = username.to_string();
            }
            None => error!("unknown peer {} (set_username)", peer),
        }
    }

    /// Record the port a peer accepts inbound connections on.
    pub async fn set_advertised_port(&self, peer: SocketAddr, port: u16) {
        match self.peers.write().await.get_mut(&peer) {
            Some(info) => info.advertised_port = Some(port),
            None => error!("unknown peer {} (set_advertised_port)", peer),
        }
    }

    /// The display name a peer reported, or the default sentinel.
    pub async fn username_of(&self, peer: SocketAddr) -> String {
        match self.peers.read().await.get(&peer) {
            Some(info) => info.username.clone(),
            None => {
                error!("unknown peer {} (username_of)", peer);
                DEFAULT_USERNAME.to_string()
            }
        }
    }

    /// Bump a peer's warning counter and return the new value.
    pub async fn give_warning(&self, peer: SocketAddr) -> u32 {
        match self.peers.write().await.get_mut(&peer) {
            Some(info) => {
                info.warnings += 1;
                info.warnings
            }
            None => {
                error!("unknown peer {} (give_warning)", peer);
                0
            }
        }
    }

    /// `(address, listen port)` of every peer whose listen endpoint is
    /// known.
    pub async fn advertised_roster(&self) -> Vec<Endpoint> {
        self.peers
            .read()
            .await
            .iter()
            .filter_map(|(addr, info)| {
                info.advertised_port
                    .map(|port| (addr.ip().to_string(), port))
            })
            .collect()
    }

    /// Whether some peer is already reachable at `ip:port`.
    pub async fn has_connection_to(&self, ip: IpAddr, port: u16) -> bool {
        self.peers
            .read()
            .await
            .iter()
            .any(|(addr, info)| addr.ip() == ip && info.advertised_port == Some(port))
    }

    /// Number of connected peers.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Snapshot of the whole peer table.
    pub async fn roster(&self) -> Vec<PeerSnapshot> {
        self.peers
            .read()
            .await
            .iter()
            .map(|(addr, info)| PeerSnapshot {
                addr: *addr,
                username: info.username.clone(),
                warnings: info.warnings,
                advertised_port: info.advertised_port,
            })
            .collect()
    }

    /// Drop a peer: stop its receive loop, close the socket, forget it.
    /// Also runs from the close hook after a remote disconnect, in which
    /// case the entry is already gone and this is a no-op.
    pub async fn remove_peer(&self, peer: SocketAddr) {
        let removed = self.peers.write().await.remove(&peer);
        match removed {
            Some(info) => {
                info.listener.stop();
                let _ = info.writer.lock().await.shutdown().await;
                info!("removed peer {} ('{}')", peer, info.username);
            }
            None => debug!("unknown peer {} (remove_peer)", peer),
        }
    }

    /// Stop accepting and drop every peer.
    pub async fn shutdown(&self) {
        let task = match self.accept_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }

        let peers: Vec<SocketAddr> = self.peers.read().await.keys().copied().collect();
        for peer in peers {
            self.remove_peer(peer).await;
        }
    }
}

/// Receive-loop hooks for one peer connection.
struct PeerHandler {
    node: Arc<OverlayNode>,
    peer: SocketAddr,
}

#[async_trait]
impl MessageHandler<PeerMessage> for PeerHandler {
    async fn on_frame(&mut self, msg: PeerMessage) -> anyhow::Result<()> {
        let policy = self.node.policy.clone();
        match msg {
            PeerMessage::RegisterPort { data } => {
                policy
                    .on_peer_registered_port(&self.node, self.peer, data.listen_port)
                    .await;
            }
            other => policy.on_message(&self.node, self.peer, other).await,
        }
        Ok(())
    }

    async fn on_close(&mut self) {
        debug!("connection with {} ended", self.peer);
        self.node.remove_peer(self.peer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Quiet;

    #[async_trait]
    impl TopologyPolicy for Quiet {}

    async fn wait_for_peer_count(node: &OverlayNode, count: usize) {
        for _ in 0..100 {
            if node.peer_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("peer table never reached {count} peers");
    }

    #[tokio::test]
    async fn test_dialed_peers_register_and_disconnect() {
        let a = OverlayNode::new("a", "hello from a", Arc::new(Quiet));
        let b = OverlayNode::new("b", "hello from b", Arc::new(Quiet));
        let port = a.start_acceptor(0).await.unwrap();

        let endpoint = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let peer = b.connect_to(endpoint).await.unwrap();

        // dialed peers carry the dialed port as their advertised endpoint
        assert!(b.has_connection_to(endpoint.ip(), port).await);
        assert_eq!(b.advertised_roster().await, vec![("127.0.0.1".into(), port)]);
        wait_for_peer_count(&a, 1).await;

        b.remove_peer(peer).await;
        assert_eq!(b.peer_count().await, 0);
        // the remote side notices the close and forgets us too
        wait_for_peer_count(&a, 0).await;
    }

    #[tokio::test]
    async fn test_unknown_peer_operations_are_noops() {
        let node = OverlayNode::new("a", "hi", Arc::new(Quiet));
        let ghost = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);

        node.direct_message(ghost, "anyone there?").await;
        node.direct_message_username("nobody", "hello?").await;
        node.set_username(ghost, "ghost").await;
        node.remove_peer(ghost).await;
        assert_eq!(node.give_warning(ghost).await, 0);
        assert_eq!(node.username_of(ghost).await, DEFAULT_USERNAME);
    }

    #[tokio::test]
    async fn test_warning_bookkeeping() {
        let a = OverlayNode::new("a", "hi", Arc::new(Quiet));
        let b = OverlayNode::new("b", "hi", Arc::new(Quiet));
        let port = a.start_acceptor(0).await.unwrap();
        let peer = b
            .connect_to(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
            .await
            .unwrap();

        assert_eq!(b.give_warning(peer).await, 1);
        assert_eq!(b.give_warning(peer).await, 2);
        let roster = b.roster().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].warnings, 2);
    }
}
