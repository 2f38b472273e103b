//! TCP transport and the per-connection receive loop for huddle.
//!
//! Both the directory service and every overlay node drive their
//! connections through the same primitive: one [`ConnectionListener`] per
//! TCP connection, decoding a single message family and dispatching each
//! valid frame to a per-connection handler.
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use huddle_session::{connect_tcp, split_stream, ConnectionListener, ListenerConfig, MessageHandler};
//! use huddle_wire::PeerMessage;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl MessageHandler<PeerMessage> for Printer {
//!     async fn on_frame(&mut self, msg: PeerMessage) -> anyhow::Result<()> {
//!         println!("{msg:?}");
//!         Ok(())
//!     }
//!
//!     async fn on_close(&mut self) {
//!         println!("connection ended");
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let stream = connect_tcp("127.0.0.1:3100".parse()?).await?;
//! let (reader, _writer) = split_stream(stream);
//! let listener = ConnectionListener::spawn(reader, ListenerConfig::default(), Printer);
//! listener.join().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod listener;
pub mod transport;

// Re-export main types
pub use listener::{ConnectionListener, ListenerConfig, MessageHandler, StopHandle};
pub use transport::{
    connect_tcp, listen_tcp, send_frame, send_shared, split_stream, SharedWriter,
};
