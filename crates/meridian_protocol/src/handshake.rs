//! Handshake obfuscation exchanged at connection start.
//!
//! On accept the server greets the client with a 16-bit seed derived from
//! the wall clock. The client answers with a Connection frame, and the
//! server replies with the seed XORed against [`HANDSHAKE_XOR`] plus the
//! current unix timestamp. None of this is cryptographic - it exists to
//! match the client's expectations, not to authenticate anyone.

use crate::{Frame, CODE_CONNECTION, HANDSHAKE_XOR};
use bytes::{BufMut, Bytes, BytesMut};

/// Derives the greeting seed sent immediately after accept.
pub fn greeting_seed(unix_secs: u64) -> i16 {
    (unix_secs & 0xFFFF) as i16
}

/// Computes the obfuscated seed echoed back in the Connection reply.
pub fn reply_seed(seed: i16) -> i16 {
    (seed as u16 ^ HANDSHAKE_XOR) as i16
}

/// Builds the greeting frame carrying the handshake seed.
pub fn greeting_frame(seed: i16) -> Frame {
    let mut payload = BytesMut::with_capacity(2);
    payload.put_i16_le(seed);
    Frame::new(CODE_CONNECTION, payload.freeze())
}

/// Builds the reply to a client Connection frame: the XORed seed followed
/// by the current unix timestamp.
pub fn reply_frame(seed: i16, unix_secs: u64) -> Frame {
    let mut payload = BytesMut::with_capacity(6);
    payload.put_i16_le(reply_seed(seed));
    payload.put_i32_le(unix_secs as i32);
    Frame::new(CODE_CONNECTION, payload.freeze())
}

/// The client's Connection frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Connection kind declared by the client (game client, tool, etc.).
    pub kind: u8,
}

impl ConnectionRequest {
    /// Parses a Connection payload. An empty payload is a bare handshake
    /// retry and defaults to kind `0`.
    pub fn parse(payload: &Bytes) -> Self {
        Self {
            kind: payload.first().copied().unwrap_or(0),
        }
    }
}
