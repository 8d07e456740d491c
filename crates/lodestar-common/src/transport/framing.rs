//! Length-prefixed framing.
//!
//! Every message on the wire is `[u32 big-endian length][body]`. The decoder
//! works against a [`ByteBuffer`] that accumulates raw socket reads and yields
//! one complete body at a time.

use crate::buffer::ByteBuffer;
use crate::protocol::{Result, RpcError};

/// Bytes in the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Maximum frame body size (100 MB). Lengths beyond this are treated as a
/// corrupt stream, not a large message.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Encodes a body into one frame. Callers must not submit empty bodies; the
/// decoder treats a zero length as stream corruption.
pub fn encode(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Attempts to extract one complete frame from `buf`.
///
/// Returns `Ok(false)` when fewer than a header, or fewer than `header +
/// length` bytes are buffered; the buffer is left untouched for the next
/// read. On a complete frame the body is moved into `body` and the entire
/// frame is consumed.
///
/// A length of zero or beyond [`MAX_FRAME_SIZE`] means the stream is
/// corrupt: the buffer is drained to resynchronize and an error is returned.
/// The caller should close the connection.
pub fn decode(buf: &mut ByteBuffer, body: &mut Vec<u8>) -> Result<bool> {
    if buf.readable_bytes() < FRAME_HEADER_LEN {
        return Ok(false);
    }
    let len = buf.peek_u32()? as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        buf.retrieve_all();
        return Err(RpcError::Protocol(format!(
            "invalid frame length {} (max {})",
            len, MAX_FRAME_SIZE
        )));
    }
    if buf.readable_bytes() < FRAME_HEADER_LEN + len {
        return Ok(false);
    }
    buf.retrieve(FRAME_HEADER_LEN);
    body.clear();
    body.extend_from_slice(&buf.peek()[..len]);
    buf.retrieve(len);
    Ok(true)
}
