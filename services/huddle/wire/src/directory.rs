//! Request and response families for the directory protocol.
//!
//! Clients speak to the directory with exactly three requests (LIST, JOIN,
//! CREATE) and the directory answers each with exactly one response. Both
//! families are closed tagged enums: a frame whose fields do not fit the
//! schema of its `type` tag fails to decode and is dropped by the receive
//! loop, so a request that reaches a handler is already validated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved display name of a meeting's creator. Can never be claimed.
pub const HOST_USERNAME: &str = "HOST";

/// Sentinel name a peer carries until it registers a real one. Can never
/// be claimed either.
pub const DEFAULT_USERNAME: &str = "default_user";

/// Overlay shape of a meeting, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One moderating hub, many spokes
    Star,
    /// Every peer directly connected to every other peer
    Mesh,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Star => write!(f, "star"),
            Topology::Mesh => write!(f, "mesh"),
        }
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "star" => Ok(Topology::Star),
            "mesh" => Ok(Topology::Mesh),
            other => Err(format!("unknown topology '{other}', expected 'star' or 'mesh'")),
        }
    }
}

/// A meeting endpoint as it travels on the wire: IP address and port.
pub type Endpoint = (String, u16);

/// Requests from clients to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DirectoryRequest {
    /// List ongoing meetings
    #[serde(rename = "list")]
    List,
    /// Join an existing meeting under a chosen username
    #[serde(rename = "join")]
    Join {
        /// Join parameters
        data: JoinData,
    },
    /// Create a new meeting
    #[serde(rename = "create")]
    Create {
        /// Creation parameters
        data: CreateData,
    },
}

/// Payload of a JOIN request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinData {
    /// Meeting to join
    #[serde(rename = "meetingID")]
    pub meeting_id: u64,
    /// Display name the joiner wants to claim
    pub username: String,
}

/// Payload of a CREATE request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateData {
    /// Overlay shape of the new meeting
    #[serde(rename = "meetingType")]
    pub meeting_type: Topology,
}

impl DirectoryRequest {
    /// Build a JOIN request
    pub fn join(meeting_id: u64, username: impl Into<String>) -> Self {
        DirectoryRequest::Join {
            data: JoinData {
                meeting_id,
                username: username.into(),
            },
        }
    }

    /// Build a CREATE request
    pub fn create(meeting_type: Topology) -> Self {
        DirectoryRequest::Create {
            data: CreateData { meeting_type },
        }
    }
}

/// Responses from the directory to clients.
///
/// Every response carries `success` and a human-readable `message`; the
/// `data` payload depends on the request kind and is `null` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DirectoryResponse {
    /// Answer to LIST; always succeeds
    #[serde(rename = "list")]
    List {
        /// Always true
        success: bool,
        /// Human-readable summary
        message: String,
        /// `(meetingID, topology)` of every live meeting
        data: Vec<(u64, Topology)>,
    },
    /// Answer to JOIN
    #[serde(rename = "join")]
    Join {
        /// Whether the join was admitted
        success: bool,
        /// Human-readable outcome
        message: String,
        /// Rendezvous details on success, `null` on failure
        data: Option<JoinGrant>,
    },
    /// Answer to CREATE
    #[serde(rename = "create")]
    Create {
        /// Whether the meeting was created
        success: bool,
        /// Human-readable outcome
        message: String,
        /// New meeting details on success, `null` on failure
        data: Option<CreateGrant>,
    },
}

/// Rendezvous details handed to an admitted joiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinGrant {
    /// Address and port of the meeting's entry point
    pub host: Endpoint,
    /// The username the directory admitted
    pub username: String,
    /// Topology of the meeting being joined
    #[serde(rename = "meetingType")]
    pub meeting_type: Topology,
    /// Port the joiner must listen on itself; assigned for mesh meetings only
    #[serde(rename = "listen_p2p_port", default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

/// Details handed to the creator of a new meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGrant {
    /// Identifier of the new meeting
    #[serde(rename = "meetingID")]
    pub meeting_id: u64,
    /// Topology the meeting was created with
    #[serde(rename = "meetingType")]
    pub meeting_type: Topology,
    /// Rendezvous port the creator must listen on
    #[serde(rename = "listen_p2p_port")]
    pub listen_port: u16,
}

impl DirectoryResponse {
    /// Successful LIST response
    pub fn listing(meetings: Vec<(u64, Topology)>) -> Self {
        DirectoryResponse::List {
            success: true,
            message: format!("\nMeetings found: {}\n", meetings.len()),
            data: meetings,
        }
    }

    /// Successful JOIN response for a star meeting
    pub fn join_star(host: Endpoint, username: impl Into<String>) -> Self {
        DirectoryResponse::Join {
            success: true,
            message: "Join request successful! Preparing to join...".to_string(),
            data: Some(JoinGrant {
                host,
                username: username.into(),
                meeting_type: Topology::Star,
                listen_port: None,
            }),
        }
    }

    /// Successful JOIN response for a mesh meeting, carrying the fresh
    /// listen port assigned to the joiner
    pub fn join_mesh(host: Endpoint, username: impl Into<String>, listen_port: u16) -> Self {
        DirectoryResponse::Join {
            success: true,
            message: "Join request successful! Preparing to join...".to_string(),
            data: Some(JoinGrant {
                host,
                username: username.into(),
                meeting_type: Topology::Mesh,
                listen_port: Some(listen_port),
            }),
        }
    }

    /// Failed JOIN response
    pub fn join_failure(reason: impl fmt::Display) -> Self {
        DirectoryResponse::Join {
            success: false,
            message: format!("Join failed with error: '{reason}'"),
            data: None,
        }
    }

    /// Successful CREATE response
    pub fn created(meeting_id: u64, meeting_type: Topology, listen_port: u16) -> Self {
        DirectoryResponse::Create {
            success: true,
            message: "Create request successful! Creating new meeting...".to_string(),
            data: Some(CreateGrant {
                meeting_id,
                meeting_type,
                listen_port,
            }),
        }
    }

    /// Whether the response reports success
    pub fn success(&self) -> bool {
        match self {
            DirectoryResponse::List { success, .. }
            | DirectoryResponse::Join { success, .. }
            | DirectoryResponse::Create { success, .. } => *success,
        }
    }

    /// The human-readable outcome text
    pub fn message(&self) -> &str {
        match self {
            DirectoryResponse::List { message, .. }
            | DirectoryResponse::Join { message, .. }
            | DirectoryResponse::Create { message, .. } => message,
        }
    }
}
