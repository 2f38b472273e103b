//! The huddle directory service.
//!
//! A thin rendezvous point: clients connect, CREATE or JOIN a meeting, and
//! walk away with an endpoint on a second, independently-addressed overlay
//! network. The directory never relays meeting traffic and forgets a room
//! as soon as a LIST probe finds its host gone.
//!
//! ## Example
//!
//! ```rust,no_run
//! use huddle_directory::{Directory, DirectoryClient, DirectoryServer};
//! use huddle_wire::Topology;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let directory = Arc::new(Directory::new(3100));
//! let server = DirectoryServer::bind("0.0.0.0:2000".parse()?, directory).await?;
//!
//! let mut client = DirectoryClient::connect("127.0.0.1:2000".parse()?).await?;
//! let grant = client.create(Topology::Star).await?;
//! println!("meeting {} on port {}", grant.meeting_id, grant.listen_port);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
pub mod client;
pub mod registry;
pub mod server;

// Re-export main types
pub use alloc::{IdAllocator, PortAllocator};
pub use client::DirectoryClient;
pub use registry::{ControlHandle, Directory, MeetingEntry};
pub use server::DirectoryServer;
