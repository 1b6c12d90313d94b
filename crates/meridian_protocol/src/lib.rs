//! # Meridian Protocol - Wire Format Core
//!
//! Frame-level codec for the Meridian game protocol: a length-prefixed,
//! checksummed binary format carried over raw TCP. This crate is a pure
//! leaf - it performs no I/O and owns no sockets. It turns receive buffers
//! into validated frames and frames back into bytes, and implements the
//! handshake obfuscation exchanged at connection start.
//!
//! ## Wire layout
//!
//! ```text
//! offset 0:          i32  length     (total frame size, little-endian)
//! offset 4:          i16  type code
//! offset 6:          payload
//! offset length - 4: i32  checksum   (absent on exempt types)
//! ```
//!
//! The connection and keepalive types are exempt from the checksum and may
//! declare a zero length. Every other frame carries a trailing checksum of
//! `length XOR CHECKSUM_SEED`, with a checksum field of `0` acting as an
//! explicit validation bypass.
//!
//! ## Failure model
//!
//! Decoding is driven by explicit status values, never panics or error
//! unwinding. One structurally invalid frame aborts the rest of the batch
//! it arrived in - the remainder of that receive is discarded wholesale.
//! This fail-fast policy is observable by clients (it bounds how many
//! frames of a batch are processed) and is preserved deliberately.

pub mod frame;
pub mod handshake;

pub use frame::{decode_batch, BatchDecode, Frame, FrameFault, FaultKind, Verdict};
pub use handshake::{greeting_frame, greeting_seed, reply_frame, reply_seed, ConnectionRequest};

/// Size of the frame header: a 4-byte length followed by a 2-byte type code.
pub const HEADER_LEN: usize = 6;

/// Size of the trailing checksum on non-exempt frames.
pub const CHECKSUM_LEN: usize = 4;

/// Upper bound on a single frame's declared length. Anything larger is
/// treated as hostile and poisons the rest of the receive batch.
pub const MAX_FRAME_LEN: i32 = 131_072;

/// Hard cap on frames decoded out of a single receive. Frames beyond the
/// cap stay buffered and are simply not processed this cycle.
pub const MAX_FRAMES_PER_RECEIVE: usize = 512;

/// Shared checksum constant. This value is baked into the client build and
/// exchanged out-of-band; it must match the client exactly or every
/// checksummed frame the client sends will be rejected.
pub const CHECKSUM_SEED: i32 = 0x1F2D_3C4B;

/// XOR applied to the handshake seed when answering a Connection frame.
/// Obfuscation only - this is not an authentication credential.
pub const HANDSHAKE_XOR: u16 = 32_321;

/// Type code of the Connection (handshake) frame.
pub const CODE_CONNECTION: i16 = 0x0001;

/// Type code of the keepalive frame.
pub const CODE_KEEPALIVE: i16 = 0x0002;

/// Returns whether a type code is exempt from checksum and zero-length
/// validation. Only the handshake and keepalive frames qualify.
pub fn is_exempt(type_code: i16) -> bool {
    type_code == CODE_CONNECTION || type_code == CODE_KEEPALIVE
}
