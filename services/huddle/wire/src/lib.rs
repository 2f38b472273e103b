//! Delimiter-framed JSON message families for huddle.
//!
//! This crate defines the three message families shared by the directory
//! and the overlay layer, and the framing codec that puts them on the wire.
//!
//! ## Wire Format
//!
//! ```text
//! +---------------------------+-----+---------------------------+-----+
//! | JSON object (UTF-8 text)  | ';' | JSON object               | ';' | ...
//! +---------------------------+-----+---------------------------+-----+
//! ```
//!
//! No length prefix; receivers split the TCP byte stream on the delimiter.
//! A truncated trailing fragment stays buffered until the next read.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod directory;
pub mod error;
pub mod peer;

// Re-export main types
pub use codec::{encode, FrameDecoder, DELIMITER, PROBE_FRAME};
pub use directory::{
    CreateData, CreateGrant, DirectoryRequest, DirectoryResponse, Endpoint, JoinData, JoinGrant,
    Topology, DEFAULT_USERNAME, HOST_USERNAME,
};
pub use error::CodecError;
pub use peer::{PeerMessage, PortData, RosterData, UsernameData};
