//! Full-mesh topology: every peer directly connected to every other peer.
//!
//! The meeting's creator is only special in that the directory hands its
//! address to joiners; once wired in, no node has privileges over any
//! other. A newly accepted peer is told which other peers already accept
//! connections (the roster as it stood at accept time), and it dials each
//! of them to complete the mesh. Joins that happen strictly one at a time
//! converge to a complete graph; simultaneous joins are best-effort.

use crate::node::{OverlayNode, TopologyPolicy};
use async_trait::async_trait;
use huddle_wire::{Endpoint, PeerMessage, HOST_USERNAME};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The one policy every mesh node runs, creator or joiner.
pub struct MeshPolicy;

#[async_trait]
impl TopologyPolicy for MeshPolicy {
    async fn on_peer_connected(
        &self,
        node: &OverlayNode,
        peer: SocketAddr,
        roster_at_accept: Vec<Endpoint>,
    ) {
        // hand the newcomer everything it needs to finish the mesh
        node.send_to(peer, &PeerMessage::mesh_connect(roster_at_accept))
            .await;
    }

    async fn on_message(&self, node: &OverlayNode, peer: SocketAddr, msg: PeerMessage) {
        match msg {
            PeerMessage::Text { message } => {
                info!("{} says: {}", node.username_of(peer).await, message);
            }
            PeerMessage::RegisterUsername { data } => {
                node.set_username(peer, &data.username).await;
            }
            PeerMessage::MeshConnect { data } => {
                connect_roster(node, data.peers).await;
            }
            PeerMessage::RegisterPort { data } => {
                self.on_peer_registered_port(node, peer, data.listen_port)
                    .await;
            }
        }
    }

    async fn on_peer_registered_port(
        &self,
        node: &OverlayNode,
        peer: SocketAddr,
        listen_port: u16,
    ) {
        // future joiners will be pointed at this endpoint
        node.set_advertised_port(peer, listen_port).await;
    }
}

/// Dial every roster entry we are not already connected to, announcing
/// our username to each.
async fn connect_roster(node: &OverlayNode, roster: Vec<Endpoint>) {
    for (addr, port) in roster {
        let endpoint: SocketAddr = match format!("{addr}:{port}").parse() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("bad mesh roster entry {}:{}: {}", addr, port, e);
                continue;
            }
        };

        if node.has_connection_to(endpoint.ip(), endpoint.port()).await {
            debug!("already connected to mesh peer {}", endpoint);
            continue;
        }

        match node.connect_to(endpoint).await {
            Ok(peer) => {
                node.send_to(peer, &PeerMessage::register_username(node.username()))
                    .await;
                node.send_to(peer, &PeerMessage::text(node.welcome())).await;
            }
            Err(e) => warn!("connection with mesh peer {} failed: {}", endpoint, e),
        }
    }
}

/// Start a mesh meeting as its creator, listening on `listen_port`
/// (0 picks a free port).
pub async fn create(meeting_id: u64, listen_port: u16) -> anyhow::Result<Arc<OverlayNode>> {
    let node = OverlayNode::new(
        HOST_USERNAME,
        format!("You are connected to host of meeting {meeting_id}."),
        Arc::new(MeshPolicy),
    );
    node.start_acceptor(listen_port).await?;
    Ok(node)
}

/// Join a mesh meeting: listen on `listen_port`, connect to the entry
/// peer, announce username and listen port, and let its roster message
/// drive the remaining connections.
pub async fn join(
    username: &str,
    entry: Endpoint,
    listen_port: u16,
) -> anyhow::Result<Arc<OverlayNode>> {
    let (entry_addr, entry_port) = entry;
    let entry: SocketAddr = format!("{entry_addr}:{entry_port}").parse()?;

    let node = OverlayNode::new(
        username,
        format!("You are connected to user '{username}'"),
        Arc::new(MeshPolicy),
    );
    let bound = node.start_acceptor(listen_port).await?;

    let peer = node.connect_to(entry).await?;
    node.send_to(peer, &PeerMessage::register_username(username))
        .await;
    node.send_to(peer, &PeerMessage::register_port(bound)).await;
    node.send_to(peer, &PeerMessage::text(node.welcome())).await;

    Ok(node)
}
