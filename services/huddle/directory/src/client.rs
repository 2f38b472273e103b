//! Client side of the directory protocol.
//!
//! A [`DirectoryClient`] holds one connection to the directory, sends one
//! request at a time, and hands back the typed grant. The connection stays
//! open afterwards: for meeting creators it doubles as the liveness
//! channel the directory probes, so dropping the client is what makes the
//! directory forget the room.

use async_trait::async_trait;
use huddle_session::{
    connect_tcp, send_shared, split_stream, ConnectionListener, ListenerConfig, MessageHandler,
    SharedWriter,
};
use huddle_wire::{CreateGrant, DirectoryRequest, DirectoryResponse, JoinGrant, Topology};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// One client connection to the directory.
pub struct DirectoryClient {
    writer: SharedWriter,
    responses: mpsc::UnboundedReceiver<DirectoryResponse>,
    // keeps the receive loop alive as long as the client exists
    _listener: ConnectionListener,
}

impl DirectoryClient {
    /// Connect to the directory at `addr`.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = connect_tcp(addr).await?;
        info!("connected to directory at {}", addr);

        let (reader, writer) = split_stream(stream);
        let (tx, responses) = mpsc::unbounded_channel();
        let listener =
            ConnectionListener::spawn(reader, ListenerConfig::default(), ResponseHandler { tx });

        Ok(Self {
            writer,
            responses,
            _listener: listener,
        })
    }

    /// Ask for the current meeting listing.
    pub async fn list(&mut self) -> anyhow::Result<Vec<(u64, Topology)>> {
        match self.request(DirectoryRequest::List).await? {
            DirectoryResponse::List { data, .. } => Ok(data),
            other => anyhow::bail!("unexpected response to LIST: {}", other.message()),
        }
    }

    /// Create a meeting. The returned grant names the rendezvous port this
    /// client must start listening on.
    pub async fn create(&mut self, topology: Topology) -> anyhow::Result<CreateGrant> {
        match self.request(DirectoryRequest::create(topology)).await? {
            DirectoryResponse::Create {
                data: Some(grant), ..
            } => Ok(grant),
            other => anyhow::bail!("create request failed: {}", other.message()),
        }
    }

    /// Join a meeting under `username`.
    pub async fn join(&mut self, meeting_id: u64, username: &str) -> anyhow::Result<JoinGrant> {
        match self
            .request(DirectoryRequest::join(meeting_id, username))
            .await?
        {
            DirectoryResponse::Join {
                data: Some(grant), ..
            } => Ok(grant),
            other => anyhow::bail!("join request failed: {}", other.message()),
        }
    }

    async fn request(&mut self, request: DirectoryRequest) -> anyhow::Result<DirectoryResponse> {
        send_shared(&self.writer, &request).await?;
        let response = tokio::time::timeout(RESPONSE_TIMEOUT, self.responses.recv())
            .await
            .map_err(|_| anyhow::anyhow!("directory did not answer in time"))?;
        response.ok_or_else(|| anyhow::anyhow!("directory closed the connection"))
    }
}

struct ResponseHandler {
    tx: mpsc::UnboundedSender<DirectoryResponse>,
}

#[async_trait]
impl MessageHandler<DirectoryResponse> for ResponseHandler {
    async fn on_frame(&mut self, msg: DirectoryResponse) -> anyhow::Result<()> {
        debug!("directory response: {:?}", msg);
        self.tx.send(msg)?;
        Ok(())
    }

    async fn on_close(&mut self) {
        info!("disconnected from directory");
    }
}
