//! Per-topology peer logic for huddle meetings.
//!
//! A meeting's overlay is built from one shared core, [`OverlayNode`]
//! (peer table, accept loop, send/broadcast/remove primitives), plus a
//! [`TopologyPolicy`] that decides what happens when peers connect and
//! talk. The [`star`] module supplies the moderated hub-and-spokes
//! flavor; [`mesh`] supplies the full-mesh flavor.
//!
//! ## Example
//!
//! ```rust,no_run
//! use huddle_overlay::{mesh, star, Moderation};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // host a moderated star meeting on the directory-assigned port
//! let host = star::spawn_host(0, 3100, Moderation::default()).await?;
//!
//! // elsewhere: join it as a spoke
//! let audience = star::StarAudience::join("ada", ("10.0.0.1".into(), 3100)).await?;
//! audience.ask("is this thing on?").await;
//!
//! // or run a mesh meeting instead
//! let node = mesh::create(1, 3101).await?;
//! node.broadcast("welcome, everyone").await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mesh;
pub mod node;
pub mod star;

// Re-export main types
pub use mesh::MeshPolicy;
pub use node::{OverlayNode, PeerSnapshot, TopologyPolicy};
pub use star::{Moderation, StarAudience, StarModerator, StarSpectator};
