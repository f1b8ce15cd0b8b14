//! Length-prefixed JSON framing.
//!
//! Every message on the wire is a 4-byte big-endian unsigned length `N`
//! followed by exactly `N` bytes of UTF-8 JSON. One request yields exactly
//! one response on the same connection; a framing error drops the
//! connection without touching any peer state.

use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};

/// Default cap on a single frame's length.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 128 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame length {0} exceeds cap {1}")]
    TooLarge(u32, u32),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write one length-prefixed JSON frame and flush it.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), CodecError> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON frame, rejecting lengths above `max_len`.
pub fn read_frame<R: Read, T: DeserializeOwned>(
    reader: &mut R,
    max_len: u32,
) -> Result<T, CodecError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > max_len {
        return Err(CodecError::TooLarge(len, max_len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    let value = serde_json::from_slice(&body)?;
    Ok(value)
}
