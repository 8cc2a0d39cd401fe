//! Protocol module - wire format, commands, framing and stream parsing.
//!
//! This module implements the binary protocol spoken on every connection:
//! - 16-byte frame envelope with CRC-32 body checksum
//! - Tagged command bodies (JSON text or raw bytes)
//! - Resynchronizing parser for accumulating partial socket reads

mod command;
mod frame;
mod frame_buffer;
mod wire_format;

pub use command::{Command, CommandType, TYPE_TAG_SIZE};
pub use frame::{build_frame, build_json_frame, Frame};
pub use frame_buffer::FrameParser;
pub use wire_format::{
    checksum, declared_length, decode_frame, encode_frame, ABSOLUTE_MAX_BODY_SIZE,
    DEFAULT_MAX_BODY_SIZE, FRAME_HEAD, FRAME_OVERHEAD, FRAME_TAIL, HEAD_SIZE, LENGTH_END,
};
