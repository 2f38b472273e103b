//! Wire protocol error types.

use thiserror::Error;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Frame bytes are not valid UTF-8
    #[error("frame is not valid utf-8")]
    Utf8,

    /// Frame does not match the expected message family
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Message could not be serialized
    #[error("message encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}
