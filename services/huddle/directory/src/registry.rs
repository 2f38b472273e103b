//! The meeting registry and the three directory operations.

use crate::alloc::{IdAllocator, PortAllocator};
use huddle_session::SharedWriter;
use huddle_wire::{
    DirectoryResponse, Topology, DEFAULT_USERNAME, HOST_USERNAME, PROBE_FRAME,
};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Pause between the two probe payloads; one send on a dead connection
/// often succeeds before the peer's reset comes back.
const PROBE_GAP: Duration = Duration::from_millis(100);

/// The creator's directory connection, kept as the meeting's liveness
/// probe channel.
pub struct ControlHandle {
    writer: SharedWriter,
}

impl ControlHandle {
    /// Wrap the write half of a creator's control connection.
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }

    /// Check the host is still there by sending two small test frames.
    /// Any failure means the host is gone.
    async fn probe(&self) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(PROBE_FRAME).await?;
        tokio::time::sleep(PROBE_GAP).await;
        writer.write_all(PROBE_FRAME).await?;
        Ok(())
    }

    /// Close the control connection.
    async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// One active meeting.
pub struct MeetingEntry {
    topology: Topology,
    /// `(ip, rendezvous port)` peers must dial to join this room's overlay
    host_addr: (String, u16),
    control: ControlHandle,
    /// Names claimed in this room. Grows monotonically: a name once taken
    /// stays taken even if its holder leaves.
    usernames: HashSet<String>,
}

impl MeetingEntry {
    fn new(topology: Topology, host_addr: (String, u16), control: ControlHandle) -> Self {
        let mut usernames = HashSet::new();
        usernames.insert(HOST_USERNAME.to_string());
        Self {
            topology,
            host_addr,
            control,
            usernames,
        }
    }
}

/// Process-wide directory state: the meeting registry plus the two
/// monotonic allocators.
///
/// The registry is read and written from every connection-handler task, so
/// all access goes through the single `RwLock`; the allocators are
/// individually atomic, which is what guarantees ID/port uniqueness under
/// concurrent CREATE/JOIN.
pub struct Directory {
    meetings: RwLock<HashMap<u64, MeetingEntry>>,
    meeting_ids: IdAllocator,
    ports: PortAllocator,
}

impl Directory {
    /// Create an empty directory allocating rendezvous ports from
    /// `base_port` upwards.
    pub fn new(base_port: u16) -> Self {
        Self {
            meetings: RwLock::new(HashMap::new()),
            meeting_ids: IdAllocator::starting_at(0),
            ports: PortAllocator::starting_at(base_port),
        }
    }

    /// LIST: probe every meeting's host, prune the dead ones, and return
    /// the `(meetingID, topology)` pairs that survive. Always succeeds.
    pub async fn listing(&self) -> DirectoryResponse {
        let mut meetings = self.meetings.write().await;

        let mut live = Vec::new();
        let mut dead = Vec::new();
        for (&meeting_id, entry) in meetings.iter() {
            match entry.control.probe().await {
                Ok(()) => live.push((meeting_id, entry.topology)),
                Err(e) => {
                    debug!("host probe for meeting {} failed: {}", meeting_id, e);
                    dead.push(meeting_id);
                }
            }
        }

        // delete entries after iterating
        for meeting_id in dead {
            if let Some(entry) = meetings.remove(&meeting_id) {
                entry.control.close().await;
                info!("pruned meeting {} (host gone)", meeting_id);
            }
        }

        live.sort_unstable();
        DirectoryResponse::listing(live)
    }

    /// JOIN: admit `username` into `meeting_id`, claiming the name
    /// permanently. Mesh joiners additionally get a fresh listen port.
    pub async fn join(&self, meeting_id: u64, username: &str) -> DirectoryResponse {
        let mut meetings = self.meetings.write().await;

        let Some(entry) = meetings.get_mut(&meeting_id) else {
            return DirectoryResponse::join_failure(format!(
                "Meeting ID '{meeting_id}' not found."
            ));
        };

        if entry.usernames.contains(username)
            || username == HOST_USERNAME
            || username == DEFAULT_USERNAME
        {
            return DirectoryResponse::join_failure(format!(
                "Username '{username}' already taken. Please choose another."
            ));
        }

        entry.usernames.insert(username.to_string());
        info!("user '{}' joined meeting {}", username, meeting_id);

        match entry.topology {
            Topology::Star => DirectoryResponse::join_star(entry.host_addr.clone(), username),
            Topology::Mesh => DirectoryResponse::join_mesh(
                entry.host_addr.clone(),
                username,
                self.ports.allocate(),
            ),
        }
    }

    /// CREATE: allocate a meeting ID and rendezvous port, and record the
    /// requester's control connection as the room's liveness channel.
    pub async fn create(
        &self,
        topology: Topology,
        requester_ip: IpAddr,
        control: ControlHandle,
    ) -> DirectoryResponse {
        let meeting_id = self.meeting_ids.allocate();
        let port = self.ports.allocate();
        let host_addr = (requester_ip.to_string(), port);

        self.meetings
            .write()
            .await
            .insert(meeting_id, MeetingEntry::new(topology, host_addr, control));

        info!(
            "created {} meeting {} at {}:{}",
            topology, meeting_id, requester_ip, port
        );
        DirectoryResponse::created(meeting_id, topology, port)
    }

    /// Number of registered meetings (without probing).
    pub async fn len(&self) -> usize {
        self.meetings.read().await.len()
    }

    /// Whether no meeting is registered.
    pub async fn is_empty(&self) -> bool {
        self.meetings.read().await.is_empty()
    }

    /// Drop every meeting, closing the host control connections.
    pub async fn clear(&self) {
        let mut meetings = self.meetings.write().await;
        for (meeting_id, entry) in meetings.drain() {
            entry.control.close().await;
            debug!("closed control connection of meeting {}", meeting_id);
        }
    }
}
