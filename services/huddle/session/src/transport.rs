//! TCP transport for huddle connections.
//!
//! Plain TCP only; meeting traffic is neither encrypted nor authenticated.

use huddle_wire::encode;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Write half of a connection, shared between the component that owns the
/// peer and whatever tasks need to send on it.
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Encode a message and send it in a single best-effort write.
///
/// Partial or failed sends are never retried; callers log the error or act
/// on it (the directory's liveness probe turns it into entry deletion).
pub async fn send_frame<M, W>(writer: &mut W, msg: &M) -> anyhow::Result<()>
where
    M: Serialize,
    W: AsyncWrite + Unpin,
{
    let bytes = encode(msg)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// [`send_frame`] against a [`SharedWriter`].
pub async fn send_shared<M: Serialize>(writer: &SharedWriter, msg: &M) -> anyhow::Result<()> {
    let mut guard = writer.lock().await;
    send_frame(&mut *guard, msg).await
}

/// Split a stream into a read half and a shareable write half.
pub fn split_stream(stream: TcpStream) -> (tokio::net::tcp::OwnedReadHalf, SharedWriter) {
    let (read, write) = stream.into_split();
    (read, Arc::new(Mutex::new(write)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_wire::PeerMessage;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let stream = connect_tcp(bound_addr).await.unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_send_frame_appends_delimiter() {
        let mut buf = Vec::new();
        send_frame(&mut buf, &PeerMessage::text("hi")).await.unwrap();
        assert_eq!(buf.last(), Some(&huddle_wire::DELIMITER));
    }
}
