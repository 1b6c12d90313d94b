//! Frame encoding and batch decoding.
//!
//! A single TCP receive may contain zero, one, or many concatenated frames.
//! [`decode_batch`] walks the receive buffer front to back, yielding every
//! structurally valid frame and a verdict describing why it stopped.

use crate::{
    is_exempt, CHECKSUM_LEN, CHECKSUM_SEED, HEADER_LEN, MAX_FRAMES_PER_RECEIVE, MAX_FRAME_LEN,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// One decoded unit of the wire protocol: a type code and its payload,
/// with the length prefix and checksum already stripped and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The packet type code that selects the gameplay handler.
    pub type_code: i16,

    /// Payload bytes between the header and the checksum.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame from a type code and payload.
    pub fn new(type_code: i16, payload: impl Into<Bytes>) -> Self {
        Self {
            type_code,
            payload: payload.into(),
        }
    }

    /// Serializes the frame into its wire form.
    ///
    /// Non-exempt frames carry a trailing checksum of `length XOR
    /// CHECKSUM_SEED`; the handshake and keepalive types are written
    /// without one.
    pub fn encode(&self) -> Bytes {
        let exempt = is_exempt(self.type_code);
        let length = HEADER_LEN
            + self.payload.len()
            + if exempt { 0 } else { CHECKSUM_LEN };

        let mut out = BytesMut::with_capacity(length);
        out.put_i32_le(length as i32);
        out.put_i16_le(self.type_code);
        out.put_slice(&self.payload);
        if !exempt {
            out.put_i32_le(length as i32 ^ CHECKSUM_SEED);
        }
        out.freeze()
    }
}

/// Structural classification of an invalid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The declared length is negative, or too small to carry the frame's
    /// mandatory header and checksum.
    Malformed,

    /// The declared length exceeds [`MAX_FRAME_LEN`].
    Oversized,

    /// A zero declared length on a type that does not permit one.
    ZeroLength,

    /// A non-zero checksum field that does not match `length XOR
    /// CHECKSUM_SEED`.
    ChecksumMismatch,
}

/// A fatal decode fault: the frame that caused it and everything after it
/// in the same receive are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} frame (type code {type_code:?})")]
pub struct FrameFault {
    /// What was structurally wrong with the frame.
    pub kind: FaultKind,

    /// The offending frame's type code, when enough bytes were present to
    /// read it. The connection layer uses this to tolerate handshake
    /// retries instead of disconnecting.
    pub type_code: Option<i16>,
}

impl FrameFault {
    /// Whether this fault occurred on the handshake type and should be
    /// tolerated (the client is allowed to retry the handshake).
    pub fn is_handshake(&self) -> bool {
        self.type_code == Some(crate::CODE_CONNECTION)
    }
}

/// Outcome of one decoding pass over a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every complete frame was structurally valid. Bytes of a trailing
    /// partial frame (or frames past the per-receive cap) remain buffered
    /// for the next receive.
    Ok,

    /// A structurally invalid frame was hit. Frames decoded before it are
    /// still delivered; the rest of the buffer has been discarded.
    Fatal(FrameFault),
}

/// Frames extracted from one receive, plus the stop reason.
#[derive(Debug)]
pub struct BatchDecode {
    /// Validated frames in arrival order.
    pub frames: Vec<Frame>,

    /// Why decoding stopped.
    pub verdict: Verdict,
}

/// Decodes as many frames as possible from the front of `buf`.
///
/// Consumed bytes are removed from the buffer. On a fatal fault the entire
/// remaining buffer is dropped - there is no per-frame recovery within one
/// receive. At most [`MAX_FRAMES_PER_RECEIVE`] frames are produced per
/// call; anything beyond the cap stays buffered untouched.
pub fn decode_batch(buf: &mut BytesMut) -> BatchDecode {
    let mut frames = Vec::new();

    while frames.len() < MAX_FRAMES_PER_RECEIVE {
        if buf.len() < HEADER_LEN {
            // Incomplete header: wait for the next receive.
            break;
        }

        let length = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let type_code = i16::from_le_bytes([buf[4], buf[5]]);

        if length < 0 {
            return fatal(frames, buf, FaultKind::Malformed, Some(type_code));
        }
        if length > MAX_FRAME_LEN {
            return fatal(frames, buf, FaultKind::Oversized, Some(type_code));
        }

        if length == 0 {
            // Zero-length frames are legal only for the handshake and
            // keepalive types; the header itself is all there is to them.
            if !is_exempt(type_code) {
                return fatal(frames, buf, FaultKind::ZeroLength, Some(type_code));
            }
            buf.advance(HEADER_LEN);
            frames.push(Frame::new(type_code, Bytes::new()));
            continue;
        }

        let length = length as usize;
        if length < HEADER_LEN {
            // A positive length that cannot even cover its own header.
            return fatal(frames, buf, FaultKind::Malformed, Some(type_code));
        }
        if buf.len() < length {
            // Incomplete frame: wait for the next receive.
            break;
        }

        let payload = if is_exempt(type_code) {
            buf[HEADER_LEN..length].to_vec()
        } else {
            if length < HEADER_LEN + CHECKSUM_LEN {
                return fatal(frames, buf, FaultKind::Malformed, Some(type_code));
            }
            let at = length - CHECKSUM_LEN;
            let checksum =
                i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            // A zero checksum field is an explicit validation bypass.
            if checksum != 0 && checksum != (length as i32 ^ CHECKSUM_SEED) {
                return fatal(frames, buf, FaultKind::ChecksumMismatch, Some(type_code));
            }
            buf[HEADER_LEN..at].to_vec()
        };

        buf.advance(length);
        frames.push(Frame::new(type_code, payload));
    }

    BatchDecode {
        frames,
        verdict: Verdict::Ok,
    }
}

fn fatal(
    frames: Vec<Frame>,
    buf: &mut BytesMut,
    kind: FaultKind,
    type_code: Option<i16>,
) -> BatchDecode {
    // One bad frame poisons the rest of the receive.
    buf.clear();
    BatchDecode {
        frames,
        verdict: Verdict::Fatal(FrameFault { kind, type_code }),
    }
}
