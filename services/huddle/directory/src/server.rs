//! The directory's TCP front: acceptor loop, per-connection request
//! dispatch, and shutdown.

use crate::registry::{ControlHandle, Directory};
use async_trait::async_trait;
use huddle_session::{
    listen_tcp, send_shared, split_stream, ConnectionListener, ListenerConfig, MessageHandler,
    SharedWriter,
};
use huddle_wire::DirectoryRequest;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One accepted client connection, kept so shutdown can close it.
struct ClientConn {
    peer: SocketAddr,
    writer: SharedWriter,
    listener: ConnectionListener,
}

/// The directory service: one acceptor loop, one request listener per
/// accepted connection.
pub struct DirectoryServer {
    local_addr: SocketAddr,
    directory: Arc<Directory>,
    clients: Arc<Mutex<Vec<ClientConn>>>,
    accept_task: JoinHandle<()>,
}

impl DirectoryServer {
    /// Bind the well-known directory port and start accepting clients.
    /// Failure to bind is fatal; everything after that is handled per
    /// connection.
    pub async fn bind(addr: SocketAddr, directory: Arc<Directory>) -> anyhow::Result<Self> {
        Self::bind_with(addr, directory, ListenerConfig::default()).await
    }

    /// [`bind`](Self::bind), with an explicit per-connection listener
    /// configuration (e.g. a keep-alive deadline for idle clients).
    pub async fn bind_with(
        addr: SocketAddr,
        directory: Arc<Directory>,
        listener_config: ListenerConfig,
    ) -> anyhow::Result<Self> {
        let listener = listen_tcp(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("directory listening on {}", local_addr);

        let clients: Arc<Mutex<Vec<ClientConn>>> = Arc::new(Mutex::new(Vec::new()));

        let directory_accept = directory.clone();
        let clients_accept = clients.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!("new client connection from {}", peer);
                        let (reader, writer) = split_stream(stream);

                        // each connection gets its own handler state
                        let handler = RequestHandler {
                            directory: directory_accept.clone(),
                            writer: writer.clone(),
                            peer,
                        };
                        let request_listener =
                            ConnectionListener::spawn(reader, listener_config.clone(), handler);

                        clients_accept.lock().await.push(ClientConn {
                            peer,
                            writer,
                            listener: request_listener,
                        });
                    }
                    Err(e) => {
                        warn!("accept error: {}; stopping directory listener", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            directory,
            clients,
            accept_task,
        })
    }

    /// The address the directory actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drop every meeting, and close every client
    /// connection. In-flight receive loops observe the closed sockets and
    /// run their close hooks.
    pub async fn shutdown(self) {
        self.accept_task.abort();
        self.directory.clear().await;

        let mut clients = self.clients.lock().await;
        for client in clients.drain(..) {
            debug!("closing client connection {}", client.peer);
            client.listener.stop();
            let _ = client.writer.lock().await.shutdown().await;
        }
        info!("directory shut down");
    }
}

/// Per-connection dispatch of directory requests. Sends exactly one
/// response per request; requests that fail validation never reach here,
/// the receive loop drops them at decode time.
struct RequestHandler {
    directory: Arc<Directory>,
    writer: SharedWriter,
    peer: SocketAddr,
}

#[async_trait]
impl MessageHandler<DirectoryRequest> for RequestHandler {
    async fn on_frame(&mut self, request: DirectoryRequest) -> anyhow::Result<()> {
        debug!("request from {}: {:?}", self.peer, request);

        let response = match request {
            DirectoryRequest::List => self.directory.listing().await,
            DirectoryRequest::Join { data } => {
                self.directory.join(data.meeting_id, &data.username).await
            }
            DirectoryRequest::Create { data } => {
                self.directory
                    .create(
                        data.meeting_type,
                        self.peer.ip(),
                        ControlHandle::new(self.writer.clone()),
                    )
                    .await
            }
        };

        send_shared(&self.writer, &response).await
    }

    async fn on_close(&mut self) {
        info!("client {} closed connection", self.peer);
    }
}
