//! Encoding and decoding for the wire protocol.
//!
//! Every message on the wire is a single JSON object followed by one
//! delimiter byte. There is no length prefix; receivers split the byte
//! stream on the delimiter. A single TCP read may therefore carry zero,
//! one, or several complete frames plus a truncated trailing fragment,
//! which stays buffered until the rest of it arrives.

use crate::error::CodecError;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Byte terminating each serialized message on the wire.
pub const DELIMITER: u8 = b';';

/// Payload the directory writes on a host control socket to probe liveness.
/// Delimited like any other frame so it never corrupts a buffered fragment;
/// receivers drop it as an unparseable frame.
pub const PROBE_FRAME: &[u8] = b"test;";

/// Serialize a message and append the frame delimiter.
pub fn encode<M: Serialize>(msg: &M) -> Result<Bytes, CodecError> {
    let mut buf = serde_json::to_vec(msg).map_err(CodecError::Encode)?;
    buf.push(DELIMITER);
    Ok(Bytes::from(buf))
}

/// Incremental frame decoder for one message family.
///
/// Feed it the connection's receive buffer; each call consumes at most one
/// frame. `Ok(None)` means the buffer holds no complete frame yet. `Err`
/// means one frame was consumed but did not decode; the caller logs it and
/// keeps the connection open.
#[derive(Debug)]
pub struct FrameDecoder<M> {
    _family: PhantomData<M>,
}

impl<M: DeserializeOwned> FrameDecoder<M> {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            _family: PhantomData,
        }
    }

    /// Decode one frame from a buffer
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<M>, CodecError> {
        loop {
            let Some(pos) = buf.iter().position(|&b| b == DELIMITER) else {
                // trailing fragment stays buffered for the next read
                return Ok(None);
            };

            let frame = buf.split_to(pos + 1);
            let body = &frame[..pos];

            // empty pieces between delimiters carry nothing
            if body.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            let text = std::str::from_utf8(body).map_err(|_| CodecError::Utf8)?;
            return serde_json::from_str(text)
                .map(Some)
                .map_err(CodecError::Malformed);
        }
    }
}

impl<M: DeserializeOwned> Default for FrameDecoder<M> {
    fn default() -> Self {
        Self::new()
    }
}
