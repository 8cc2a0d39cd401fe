//! Wire format encoding and decoding.
//!
//! Implements the fixed frame envelope:
//! ```text
//! ┌──────────┬──────────┬──────────────┬──────────┬──────────┐
//! │ Head     │ Length   │ Body         │ CRC-32   │ Tail     │
//! │ 4 bytes  │ int32 LE │ length bytes │ uint32 LE│ 4 bytes  │
//! │ 9A9AF0F0 │          │              │ (body)   │ A90FA90F │
//! └──────────┴──────────┴──────────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The checksum covers the body
//! only and exists to detect corruption, not tampering.

use bytes::{BufMut, Bytes, BytesMut};

use super::Frame;
use crate::error::{Result, TcpwireError};

/// Size of the head and tail magic.
pub const HEAD_SIZE: usize = 4;

/// Frame head magic.
pub const FRAME_HEAD: [u8; HEAD_SIZE] = [0x9A, 0x9A, 0xF0, 0xF0];

/// Frame tail magic.
pub const FRAME_TAIL: [u8; HEAD_SIZE] = [0xA9, 0x0F, 0xA9, 0x0F];

/// Envelope size around the body (head + length + checksum + tail).
pub const FRAME_OVERHEAD: usize = 16;

/// Bytes needed before the declared length can be read (head + length).
pub const LENGTH_END: usize = 8;

/// Default maximum body size (1 GB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 1_073_741_824;

/// Absolute maximum body size (max i32).
pub const ABSOLUTE_MAX_BODY_SIZE: u32 = 2_147_483_647;

/// CRC-32 (IEEE) of a frame body.
#[inline]
pub fn checksum(body: &[u8]) -> u32 {
    crc32fast::hash(body)
}

/// Read the declared body length from a buffer starting at a frame head.
///
/// Returns `None` if fewer than 8 bytes are available. The value may be
/// negative; callers decide how to treat it.
#[inline]
pub fn declared_length(buf: &[u8]) -> Option<i32> {
    if buf.len() < LENGTH_END {
        return None;
    }
    Some(i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]))
}

/// Wrap serialized command bytes into a complete frame.
///
/// # Errors
///
/// Returns `Protocol` if the body is larger than `i32::MAX`.
///
/// # Example
///
/// ```
/// use tcpwire::protocol::{encode_frame, FRAME_OVERHEAD};
///
/// let bytes = encode_frame(b"body").unwrap();
/// assert_eq!(bytes.len(), FRAME_OVERHEAD + 4);
/// ```
pub fn encode_frame(body: &[u8]) -> Result<Bytes> {
    let length = i32::try_from(body.len()).map_err(|_| {
        TcpwireError::Protocol(format!(
            "Body size {} exceeds maximum {}",
            body.len(),
            ABSOLUTE_MAX_BODY_SIZE
        ))
    })?;

    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + body.len());
    buf.put_slice(&FRAME_HEAD);
    buf.put_i32_le(length);
    buf.put_slice(body);
    buf.put_u32_le(checksum(body));
    buf.put_slice(&FRAME_TAIL);
    Ok(buf.freeze())
}

/// Validate and strip the envelope from a candidate frame.
///
/// Returns `None` when the bytes are not a genuine frame: fewer than 16
/// bytes, head or tail mismatch, negative or oversized declared length, or
/// checksum mismatch. Bytes after the tail are ignored.
pub fn decode_frame(buf: &[u8]) -> Option<Frame> {
    if buf.len() < FRAME_OVERHEAD || buf[..HEAD_SIZE] != FRAME_HEAD {
        return None;
    }

    let length = usize::try_from(declared_length(buf)?).ok()?;
    let total = length.checked_add(FRAME_OVERHEAD)?;
    if buf.len() < total {
        return None;
    }

    let body_end = LENGTH_END + length;
    if buf[body_end + 4..total] != FRAME_TAIL {
        return None;
    }

    let body = &buf[LENGTH_END..body_end];
    let stored = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    if stored != checksum(body) {
        return None;
    }

    Some(Frame::new(Bytes::copy_from_slice(body), stored))
}
