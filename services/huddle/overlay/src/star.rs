//! Star topology: one moderating host, spokes connected only to it.
//!
//! Every text a spoke sends is treated as a question. Clean questions are
//! rebroadcast to the whole room with the asker's name in front; questions
//! containing a banned word earn the asker a private warning, and the
//! third warning gets them removed from the meeting.

use crate::node::{OverlayNode, TopologyPolicy};
use async_trait::async_trait;
use huddle_wire::{Endpoint, PeerMessage, HOST_USERNAME};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Moderation rules applied by a star host.
#[derive(Debug, Clone)]
pub struct Moderation {
    /// Substrings that make a question unacceptable
    pub banned_words: Vec<String>,
    /// Warnings a spoke may accumulate before being removed
    pub max_warnings: u32,
}

impl Default for Moderation {
    fn default() -> Self {
        Self {
            banned_words: vec!["xxx".to_string(), "yyy".to_string(), "zzz".to_string()],
            max_warnings: 3,
        }
    }
}

/// Host-side policy: review questions, warn, and eventually kick.
pub struct StarModerator {
    moderation: Moderation,
}

impl StarModerator {
    /// Create a moderator with the given rules.
    pub fn new(moderation: Moderation) -> Self {
        Self { moderation }
    }

    async fn review_question(&self, node: &OverlayNode, peer: SocketAddr, question: &str) {
        let asker = node.username_of(peer).await;
        info!("new question from '{}': '{}'", asker, question);

        let clean = !self
            .moderation
            .banned_words
            .iter()
            .any(|word| question.contains(word.as_str()));

        if clean {
            node.broadcast(&format!("Question from {asker}: '{question}'"))
                .await;
            return;
        }

        let warnings = node.give_warning(peer).await;
        node.direct_message(peer, &format!("This is warning number {warnings}."))
            .await;

        if warnings >= self.moderation.max_warnings {
            info!("removing '{}' after {} warnings", asker, warnings);
            node.direct_message(peer, "\nGoodbye.").await;
            node.remove_peer(peer).await;
        }
    }
}

#[async_trait]
impl TopologyPolicy for StarModerator {
    async fn on_message(&self, node: &OverlayNode, peer: SocketAddr, msg: PeerMessage) {
        match msg {
            PeerMessage::Text { message } => self.review_question(node, peer, &message).await,
            PeerMessage::RegisterUsername { data } => {
                node.set_username(peer, &data.username).await;
            }
            // not part of star rooms
            PeerMessage::MeshConnect { .. } | PeerMessage::RegisterPort { .. } => {
                debug!("ignoring mesh control message from {}", peer);
            }
        }
    }
}

/// Spoke-side policy: display whatever the host forwards.
pub struct StarSpectator {
    transcript: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TopologyPolicy for StarSpectator {
    async fn on_message(&self, node: &OverlayNode, peer: SocketAddr, msg: PeerMessage) {
        match msg {
            PeerMessage::Text { message } => {
                info!("new message from host: {}", message);
                self.transcript.lock().await.push(message);
            }
            PeerMessage::RegisterUsername { data } => {
                node.set_username(peer, &data.username).await;
            }
            PeerMessage::MeshConnect { .. } | PeerMessage::RegisterPort { .. } => {
                debug!("ignoring mesh control message from {}", peer);
            }
        }
    }
}

/// Start hosting a star meeting on `listen_port` (0 picks a free port).
pub async fn spawn_host(
    meeting_id: u64,
    listen_port: u16,
    moderation: Moderation,
) -> anyhow::Result<Arc<OverlayNode>> {
    let node = OverlayNode::new(
        HOST_USERNAME,
        format!("You are connected to host of meeting {meeting_id}."),
        Arc::new(StarModerator::new(moderation)),
    );
    node.start_acceptor(listen_port).await?;
    Ok(node)
}

/// A spoke in a star meeting: one connection, to the host.
pub struct StarAudience {
    node: Arc<OverlayNode>,
    host: SocketAddr,
    transcript: Arc<Mutex<Vec<String>>>,
}

impl StarAudience {
    /// Connect to the host of a star meeting and announce `username`.
    pub async fn join(username: &str, host_endpoint: Endpoint) -> anyhow::Result<Self> {
        let (host_addr, host_port) = host_endpoint;
        let host: SocketAddr = format!("{host_addr}:{host_port}").parse()?;

        let transcript = Arc::new(Mutex::new(Vec::new()));
        let node = OverlayNode::new(
            username,
            format!("You are connected to user '{username}'"),
            Arc::new(StarSpectator {
                transcript: transcript.clone(),
            }),
        );

        let peer = node.connect_to(host).await?;
        node.send_to(peer, &PeerMessage::register_username(username))
            .await;

        Ok(Self {
            node,
            host: peer,
            transcript,
        })
    }

    /// Send a question to the host, which may broadcast it to the meeting
    /// after review.
    pub async fn ask(&self, question: &str) {
        self.node.direct_message(self.host, question).await;
    }

    /// Whether the connection to the host is still up.
    pub async fn connected(&self) -> bool {
        self.node.peer_count().await > 0
    }

    /// Everything the host has sent so far.
    pub async fn transcript(&self) -> Vec<String> {
        self.transcript.lock().await.clone()
    }

    /// The underlying overlay node.
    pub fn node(&self) -> &Arc<OverlayNode> {
        &self.node
    }

    /// Leave the meeting.
    pub async fn shutdown(&self) {
        self.node.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_until<F, Fut>(mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if cond().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition never became true");
    }

    async fn host_and_two_spokes() -> (Arc<OverlayNode>, StarAudience, StarAudience) {
        let host = spawn_host(7, 0, Moderation::default()).await.unwrap();
        let endpoint = ("127.0.0.1".to_string(), host.listen_port().unwrap());

        let alice = StarAudience::join("alice", endpoint.clone()).await.unwrap();
        let bob = StarAudience::join("bob", endpoint).await.unwrap();

        // wait for both names to be registered at the host
        let host_ref = host.clone();
        wait_until(|| {
            let host = host_ref.clone();
            async move {
                let names: Vec<String> =
                    host.roster().await.into_iter().map(|p| p.username).collect();
                names.contains(&"alice".to_string()) && names.contains(&"bob".to_string())
            }
        })
        .await;

        (host, alice, bob)
    }

    #[tokio::test]
    async fn test_spokes_receive_host_welcome() {
        let (_host, alice, _bob) = host_and_two_spokes().await;

        wait_until(|| async {
            alice
                .transcript()
                .await
                .iter()
                .any(|m| m.contains("You are connected to host of meeting 7."))
        })
        .await;
        // the host announced its reserved name too
        assert_eq!(alice.node().roster().await[0].username, HOST_USERNAME);
    }

    #[tokio::test]
    async fn test_clean_question_is_broadcast_with_username() {
        let (_host, alice, bob) = host_and_two_spokes().await;

        alice.ask("when do we start?").await;

        let expected = "Question from alice: 'when do we start?'";
        wait_until(|| async { bob.transcript().await.iter().any(|m| m == expected) }).await;
        // the asker hears their own question back as well
        wait_until(|| async { alice.transcript().await.iter().any(|m| m == expected) }).await;
    }

    async fn wait_for_transcript_entry(audience: &StarAudience, expected: &str) {
        for _ in 0..200 {
            if audience.transcript().await.iter().any(|m| m == expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("host never sent '{expected}'");
    }

    #[tokio::test]
    async fn test_three_warnings_then_kick() {
        let (host, alice, bob) = host_and_two_spokes().await;

        for round in 1..=3u32 {
            alice.ask("this contains xxx").await;
            let expected = format!("This is warning number {round}.");
            wait_for_transcript_entry(&alice, &expected).await;
        }

        wait_until(|| async { alice.transcript().await.iter().any(|m| m == "\nGoodbye.") }).await;
        // the host dropped the connection; both sides forget each other
        wait_until(|| async { !alice.connected().await }).await;
        wait_until(|| async { host.peer_count().await == 1 }).await;

        // the warned-out spoke's questions never reached the room
        assert!(!bob
            .transcript()
            .await
            .iter()
            .any(|m| m.contains("this contains")));
    }
}
