//! The per-connection receive loop.
//!
//! A [`ConnectionListener`] owns the read half of exactly one TCP
//! connection. It reads bytes, splits them into delimiter-framed messages
//! of a single family, and feeds each decoded frame to the connection's
//! handler. When the connection ends, by remote close, read error,
//! cooperative stop, or an expired keep-alive deadline, the handler's
//! close hook runs exactly once.

use async_trait::async_trait;
use bytes::BytesMut;
use huddle_wire::FrameDecoder;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-frame and close hooks for one connection.
///
/// Every connection gets its own owned handler value; there is no state
/// shared between the handlers of different connections unless the handler
/// itself carries an `Arc`.
#[async_trait]
pub trait MessageHandler<M>: Send + 'static {
    /// Called once per valid decoded frame, in arrival order. An `Err` is
    /// logged and the loop keeps running; it never tears down the
    /// connection.
    async fn on_frame(&mut self, msg: M) -> anyhow::Result<()>;

    /// Called exactly once when the receive loop ends, whatever the cause.
    async fn on_close(&mut self);
}

/// Configuration for a [`ConnectionListener`].
#[derive(Clone, Debug, Default)]
pub struct ListenerConfig {
    /// Wall-clock lifetime for the connection, measured from loop start.
    /// When it elapses the connection is closed regardless of traffic.
    /// `None` leaves the connection open until stopped or disconnected.
    pub keep_alive: Option<Duration>,
}

/// Cloneable handle that cooperatively stops a receive loop.
///
/// `stop` only raises a flag; an in-progress read is not interrupted, the
/// loop observes the flag at its next iteration.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the loop to exit. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Handle to the receive loop of one connection.
pub struct ConnectionListener {
    stop: StopHandle,
    task: Option<JoinHandle<()>>,
}

impl ConnectionListener {
    /// Spawn the receive loop for `reader`, decoding frames of family `M`
    /// and feeding them to `handler`.
    pub fn spawn<M, H>(reader: OwnedReadHalf, config: ListenerConfig, handler: H) -> Self
    where
        M: DeserializeOwned + Send + 'static,
        H: MessageHandler<M>,
    {
        let (tx, rx) = watch::channel(false);
        let stop = StopHandle { tx: Arc::new(tx) };
        let task = tokio::spawn(run_loop(reader, config, handler, rx));
        Self {
            stop,
            task: Some(task),
        }
    }

    /// Ask the loop to exit. Idempotent.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// A cloneable stop handle for this loop.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the loop (and its close hook) to finish.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionListener {
    /// Dropping the handle stops the loop, so an owner letting go of a
    /// peer cannot leak a read task that keeps the socket half-open.
    fn drop(&mut self) {
        self.stop.stop();
    }
}

async fn run_loop<M, H>(
    mut reader: OwnedReadHalf,
    config: ListenerConfig,
    mut handler: H,
    mut stop_rx: watch::Receiver<bool>,
) where
    M: DeserializeOwned + Send + 'static,
    H: MessageHandler<M>,
{
    let peer = reader.peer_addr().ok();
    let mut decoder = FrameDecoder::<M>::new();
    let mut buf = BytesMut::with_capacity(4 * 1024);
    let deadline = config.keep_alive.map(|d| Instant::now() + d);

    loop {
        let read = tokio::select! {
            biased;

            _ = stop_rx.changed() => {
                debug!("receive loop for {:?} stopped", peer);
                break;
            }

            _ = expiry(deadline) => {
                debug!("keep-alive deadline reached for {:?}; closing connection", peer);
                break;
            }

            read = reader.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("connection closed by {:?}", peer);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("read error from {:?}: {}", peer, e);
                break;
            }
        }

        // one read may hold several frames, or none yet
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(msg)) => {
                    if let Err(e) = handler.on_frame(msg).await {
                        warn!("handler failed on frame from {:?}: {:#}", peer, e);
                    }
                }
                Ok(None) => break,
                Err(e) => debug!("dropping invalid frame from {:?}: {}", peer, e),
            }
        }
    }

    // dropping the read half tears the socket down once the owner lets go
    // of the write half; the close hook runs exactly once on every path
    drop(reader);
    handler.on_close().await;
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{connect_tcp, listen_tcp, send_frame, split_stream};
    use huddle_wire::PeerMessage;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Collector {
        frames: mpsc::UnboundedSender<PeerMessage>,
        closed: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl MessageHandler<PeerMessage> for Collector {
        async fn on_frame(&mut self, msg: PeerMessage) -> anyhow::Result<()> {
            self.frames.send(msg)?;
            Ok(())
        }

        async fn on_close(&mut self) {
            let _ = self.closed.send(());
        }
    }

    async fn socket_pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let client = connect_tcp(bound).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn spawn_collector(
        reader: OwnedReadHalf,
        config: ListenerConfig,
    ) -> (
        ConnectionListener,
        mpsc::UnboundedReceiver<PeerMessage>,
        mpsc::UnboundedReceiver<()>,
    ) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let listener = ConnectionListener::spawn(
            reader,
            config,
            Collector {
                frames: frames_tx,
                closed: closed_tx,
            },
        );
        (listener, frames_rx, closed_rx)
    }

    #[tokio::test]
    async fn test_batched_frames_arrive_in_order() {
        let (client, server) = socket_pair().await;
        let (reader, _writer) = split_stream(server);
        let (_listener, mut frames, _closed) = spawn_collector(reader, ListenerConfig::default());

        // two frames in a single write
        let mut batch = Vec::new();
        batch.extend_from_slice(&huddle_wire::encode(&PeerMessage::text("first")).unwrap());
        batch.extend_from_slice(&huddle_wire::encode(&PeerMessage::text("second")).unwrap());
        let (_r, mut w) = client.into_split();
        w.write_all(&batch).await.unwrap();

        let first = timeout(Duration::from_secs(2), frames.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(2), frames.recv()).await.unwrap();
        assert_eq!(first, Some(PeerMessage::text("first")));
        assert_eq!(second, Some(PeerMessage::text("second")));
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let (client, server) = socket_pair().await;
        let (reader, _writer) = split_stream(server);
        let (_listener, mut frames, _closed) = spawn_collector(reader, ListenerConfig::default());

        let bytes = huddle_wire::encode(&PeerMessage::text("straddle")).unwrap();
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        let (_r, mut w) = client.into_split();
        w.write_all(head).await.unwrap();
        w.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        w.write_all(tail).await.unwrap();

        let msg = timeout(Duration::from_secs(2), frames.recv()).await.unwrap();
        assert_eq!(msg, Some(PeerMessage::text("straddle")));
    }

    #[tokio::test]
    async fn test_invalid_frame_keeps_connection_open() {
        let (client, server) = socket_pair().await;
        let (reader, _writer) = split_stream(server);
        let (_listener, mut frames, _closed) = spawn_collector(reader, ListenerConfig::default());

        let (_r, mut w) = client.into_split();
        w.write_all(b"gibberish;").await.unwrap();
        send_frame(&mut w, &PeerMessage::text("still here")).await.unwrap();

        let msg = timeout(Duration::from_secs(2), frames.recv()).await.unwrap();
        assert_eq!(msg, Some(PeerMessage::text("still here")));
    }

    #[tokio::test]
    async fn test_close_hook_on_remote_disconnect() {
        let (client, server) = socket_pair().await;
        let (reader, _writer) = split_stream(server);
        let (_listener, _frames, mut closed) = spawn_collector(reader, ListenerConfig::default());

        drop(client);
        let fired = timeout(Duration::from_secs(2), closed.recv()).await.unwrap();
        assert_eq!(fired, Some(()));
    }

    #[tokio::test]
    async fn test_keep_alive_deadline_closes_connection() {
        let (_client, server) = socket_pair().await;
        let (reader, _writer) = split_stream(server);
        let config = ListenerConfig {
            keep_alive: Some(Duration::from_millis(100)),
        };
        let (_listener, _frames, mut closed) = spawn_collector(reader, config);

        // no traffic at all; the deadline alone must end the loop
        let fired = timeout(Duration::from_secs(2), closed.recv()).await.unwrap();
        assert_eq!(fired, Some(()));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_fires_close_once() {
        let (_client, server) = socket_pair().await;
        let (reader, _writer) = split_stream(server);
        let (listener, _frames, mut closed) = spawn_collector(reader, ListenerConfig::default());

        listener.stop();
        listener.stop();
        listener.join().await;

        assert_eq!(closed.recv().await, Some(()));
        // exactly once: the channel is now closed without further values
        assert!(closed.try_recv().is_err());
    }
}
