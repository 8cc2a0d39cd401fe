//! Frame struct with typed accessors.
//!
//! Represents a validated frame with its envelope stripped.
//! Uses `bytes::Bytes` for zero-copy body sharing.
//!
//! # Example
//!
//! ```
//! use tcpwire::protocol::{build_frame, decode_frame, Command};
//!
//! let bytes = build_frame(&Command::json("{}")).unwrap();
//! let frame = decode_frame(&bytes).unwrap();
//! assert_eq!(frame.command(), Some(Command::json("{}")));
//! ```

use bytes::Bytes;

use super::command::Command;
use super::wire_format::{encode_frame, FRAME_OVERHEAD};
use crate::error::Result;

/// A decoded frame: body plus the checksum it was validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Bytes,
    checksum: u32,
}

impl Frame {
    pub(crate) fn new(body: Bytes, checksum: u32) -> Self {
        Self { body, checksum }
    }

    /// Serialized command bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get a clone of the body as Bytes (cheap, zero-copy).
    #[inline]
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    #[inline]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Size of this frame on the wire.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.body.len()
    }

    /// Decode the command carried in the body.
    pub fn command(&self) -> Option<Command> {
        Command::from_body(&self.body)
    }
}

/// Serialize a command and wrap it in a frame envelope.
pub fn build_frame(command: &Command) -> Result<Bytes> {
    encode_frame(&command.to_bytes()?)
}

/// Build a JSON command frame.
pub fn build_json_frame(json: &str) -> Result<Bytes> {
    build_frame(&Command::json(json))
}
