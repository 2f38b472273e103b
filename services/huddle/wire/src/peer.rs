//! Control and text messages exchanged between overlay peers.
//!
//! These never touch the directory; they travel on the room's own
//! connections after the rendezvous handshake.

use crate::directory::Endpoint;
use serde::{Deserialize, Serialize};

/// Messages between nodes in a meeting's overlay network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    /// Ordinary text between two peers
    #[serde(rename = "p2p_text")]
    Text {
        /// The text itself
        #[serde(default)]
        message: String,
    },
    /// A peer announcing its display name right after connecting
    #[serde(rename = "p2p_username")]
    RegisterUsername {
        /// Announcement payload
        data: UsernameData,
    },
    /// A mesh peer announcing the port it accepts inbound connections on
    #[serde(rename = "p2p_register_port")]
    RegisterPort {
        /// Announcement payload
        data: PortData,
    },
    /// Roster of already-registered peers, sent to a newly accepted mesh
    /// peer so it can finish wiring the full mesh
    #[serde(rename = "p2p_mesh_connect")]
    MeshConnect {
        /// Roster payload
        data: RosterData,
    },
}

/// Payload of a username announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameData {
    /// The announced display name
    pub username: String,
}

/// Payload of a listen-port announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortData {
    /// Port this peer accepts inbound overlay connections on
    #[serde(rename = "listen_p2p_port")]
    pub listen_port: u16,
}

/// Payload of a mesh roster message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterData {
    // "hosts" is the historical wire key for the peer list
    #[serde(rename = "hosts")]
    /// `(address, listen port)` of every peer known to accept connections
    pub peers: Vec<Endpoint>,
}

impl PeerMessage {
    /// Build a text message
    pub fn text(message: impl Into<String>) -> Self {
        PeerMessage::Text {
            message: message.into(),
        }
    }

    /// Build a username announcement
    pub fn register_username(username: impl Into<String>) -> Self {
        PeerMessage::RegisterUsername {
            data: UsernameData {
                username: username.into(),
            },
        }
    }

    /// Build a listen-port announcement
    pub fn register_port(listen_port: u16) -> Self {
        PeerMessage::RegisterPort {
            data: PortData { listen_port },
        }
    }

    /// Build a mesh roster message
    pub fn mesh_connect(peers: Vec<Endpoint>) -> Self {
        PeerMessage::MeshConnect {
            data: RosterData { peers },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags() {
        let json = serde_json::to_value(PeerMessage::text("hello")).unwrap();
        assert_eq!(json["type"], "p2p_text");
        assert_eq!(json["message"], "hello");

        let json = serde_json::to_value(PeerMessage::register_username("ada")).unwrap();
        assert_eq!(json["type"], "p2p_username");
        assert_eq!(json["data"]["username"], "ada");

        let json = serde_json::to_value(PeerMessage::register_port(3105)).unwrap();
        assert_eq!(json["type"], "p2p_register_port");
        assert_eq!(json["data"]["listen_p2p_port"], 3105);

        let json =
            serde_json::to_value(PeerMessage::mesh_connect(vec![("10.0.0.2".into(), 3101)]))
                .unwrap();
        assert_eq!(json["type"], "p2p_mesh_connect");
        assert_eq!(json["data"]["hosts"][0][1], 3101);
    }

    #[test]
    fn test_every_variant_roundtrips() {
        let messages = [
            PeerMessage::text("hello"),
            PeerMessage::register_username("ada"),
            PeerMessage::register_port(3105),
            PeerMessage::mesh_connect(vec![("10.0.0.2".into(), 3101), ("10.0.0.3".into(), 3102)]),
        ];
        for msg in messages {
            let json = serde_json::to_string(&msg).unwrap();
            let back: PeerMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn test_text_message_defaults_to_empty() {
        let msg: PeerMessage = serde_json::from_str(r#"{"type":"p2p_text"}"#).unwrap();
        assert_eq!(msg, PeerMessage::text(""));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<PeerMessage>(r#"{"type":"p2p_video"}"#).is_err());
    }
}
