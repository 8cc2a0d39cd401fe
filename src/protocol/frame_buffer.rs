//! Resynchronizing frame parser for a live TCP byte stream.
//!
//! Uses `bytes::BytesMut` for the receive buffer. TCP has no message
//! boundaries, so frame boundaries are re-derived from the head magic:
//!
//! 1. Find the earliest head magic (linear substring search driven by the
//!    pattern's failure table). Bytes before it are noise and are dropped.
//! 2. Wait until the declared length is readable, then until the whole
//!    candidate (`length + 16` bytes) is buffered.
//! 3. Validate the candidate. A genuine frame is consumed and its command
//!    emitted. A bad candidate loses only its 4 head bytes so a later,
//!    genuine head can still be found.
//!
//! # Example
//!
//! ```
//! use tcpwire::protocol::{build_frame, Command, FrameParser};
//!
//! let mut parser = FrameParser::new();
//! let frame = build_frame(&Command::json("{}")).unwrap();
//!
//! parser.push(b"line noise");
//! parser.push(&frame);
//! assert_eq!(parser.drain(), vec![Command::json("{}")]);
//! ```

use bytes::{Buf, BytesMut};

use super::command::Command;
use super::wire_format::{
    declared_length, decode_frame, DEFAULT_MAX_BODY_SIZE, FRAME_HEAD, FRAME_OVERHEAD, HEAD_SIZE,
};

/// Outcome of scanning the buffer for the head magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadSearch {
    /// Head starts at this offset.
    Found(usize),
    /// No head; the last `partial` bytes match a prefix of it.
    Missing { partial: usize },
}

/// Accumulates socket reads and extracts complete commands.
///
/// One parser per connection; it is not shared across threads, which keeps
/// frames from a single connection in arrival order.
pub struct FrameParser {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Failure table for `FRAME_HEAD` (computed once).
    failure: [usize; HEAD_SIZE],
    /// Maximum accepted declared body length.
    max_body_size: u32,
}

impl FrameParser {
    /// Create a parser with default settings.
    ///
    /// Default capacity: 64KB, max body: 1GB.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a parser with a custom max body size.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            failure: failure_table(&FRAME_HEAD),
            max_body_size,
        }
    }

    /// Append received bytes. No parsing happens here.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract every complete command currently buffered.
    ///
    /// Returns an empty vector when more data is needed. Corrupt input is
    /// skipped, never reported as an error.
    pub fn drain(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();

        loop {
            let start = match self.find_head() {
                HeadSearch::Found(start) => start,
                HeadSearch::Missing { partial } => {
                    // Keep a possible head prefix split across two reads
                    let discard = self.buffer.len() - partial;
                    if discard > 0 {
                        tracing::trace!("Discarding {} bytes without frame head", discard);
                        self.buffer.advance(discard);
                    }
                    break;
                }
            };

            if start > 0 {
                tracing::debug!("Discarding {} bytes before frame head", start);
                self.buffer.advance(start);
            }

            let Some(length) = declared_length(&self.buffer) else {
                break;
            };

            if length < 0 || length as u32 > self.max_body_size {
                tracing::debug!("Rejecting frame candidate with length {}", length);
                self.buffer.advance(HEAD_SIZE);
                continue;
            }

            let total = length as usize + FRAME_OVERHEAD;
            if self.buffer.len() < total {
                break;
            }

            match decode_frame(&self.buffer[..total]) {
                Some(frame) => {
                    self.buffer.advance(total);
                    match frame.command() {
                        Some(command) => commands.push(command),
                        None => tracing::debug!("Frame body is not a known command"),
                    }
                }
                None => {
                    tracing::debug!("Frame candidate failed validation, resyncing");
                    self.buffer.advance(HEAD_SIZE);
                }
            }
        }

        commands
    }

    /// Find the earliest head magic in the buffer.
    fn find_head(&self) -> HeadSearch {
        let mut matched = 0;
        for (i, &byte) in self.buffer.iter().enumerate() {
            while matched > 0 && byte != FRAME_HEAD[matched] {
                matched = self.failure[matched - 1];
            }
            if byte == FRAME_HEAD[matched] {
                matched += 1;
            }
            if matched == HEAD_SIZE {
                return HeadSearch::Found(i + 1 - matched);
            }
        }
        HeadSearch::Missing { partial: matched }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest proper prefix that is also a suffix, for each prefix of `pattern`.
fn failure_table<const N: usize>(pattern: &[u8; N]) -> [usize; N] {
    let mut table = [0usize; N];
    let mut k = 0;
    for i in 1..N {
        while k > 0 && pattern[i] != pattern[k] {
            k = table[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        table[i] = k;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, build_json_frame, FRAME_TAIL};

    fn json_frame(text: &str) -> Vec<u8> {
        build_json_frame(text).unwrap().to_vec()
    }

    #[test]
    fn test_failure_table_for_head() {
        assert_eq!(failure_table(&FRAME_HEAD), [0, 1, 0, 0]);
        assert_eq!(failure_table(b"aaaa"), [0, 1, 2, 3]);
        assert_eq!(failure_table(b"abab"), [0, 0, 1, 2]);
    }

    #[test]
    fn test_single_complete_frame() {
        let mut parser = FrameParser::new();
        parser.push(&json_frame("hello"));

        assert_eq!(parser.drain(), vec![Command::json("hello")]);
        assert!(parser.is_empty());
    }

    #[test]
    fn test_push_does_not_parse() {
        let mut parser = FrameParser::new();
        let frame = json_frame("x");
        parser.push(&frame);
        assert_eq!(parser.len(), frame.len());
    }

    #[test]
    fn test_multiple_frames_in_one_drain() {
        let mut parser = FrameParser::new();
        let mut data = json_frame("first");
        data.extend(json_frame("second"));
        data.extend(build_frame(&Command::binary(vec![1u8, 2])).unwrap());
        parser.push(&data);

        let commands = parser.drain();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], Command::json("first"));
        assert_eq!(commands[1], Command::json("second"));
        assert_eq!(commands[2], Command::binary(vec![1u8, 2]));
        assert!(parser.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut parser = FrameParser::new();
        let frame = json_frame("hi");

        let mut all = Vec::new();
        for byte in &frame {
            parser.push(&[*byte]);
            all.extend(parser.drain());
        }

        assert_eq!(all, vec![Command::json("hi")]);
    }

    #[test]
    fn test_waits_for_length_then_body() {
        let mut parser = FrameParser::new();
        let frame = json_frame("payload");

        parser.push(&frame[..6]);
        assert!(parser.drain().is_empty());
        assert_eq!(parser.len(), 6);

        parser.push(&frame[6..20]);
        assert!(parser.drain().is_empty());

        parser.push(&frame[20..]);
        assert_eq!(parser.drain(), vec![Command::json("payload")]);
    }

    #[test]
    fn test_noise_without_head_is_discarded() {
        let mut parser = FrameParser::new();
        parser.push(&[1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(parser.drain().is_empty());
        assert!(parser.is_empty());
    }

    #[test]
    fn test_head_split_across_pushes_is_retained() {
        let mut parser = FrameParser::new();
        let frame = json_frame("split");

        let mut first = vec![0x11, 0x22, 0x33];
        first.extend_from_slice(&frame[..3]);
        parser.push(&first);
        assert!(parser.drain().is_empty());
        // Only the 3-byte head prefix survives
        assert_eq!(parser.len(), 3);

        parser.push(&frame[3..]);
        assert_eq!(parser.drain(), vec![Command::json("split")]);
    }

    #[test]
    fn test_noise_with_head_magic_around_genuine_frame() {
        let mut parser = FrameParser::new();

        // Fake candidate: head, small length, garbage body, bad crc and tail
        let mut data = vec![0xDE, 0xAD];
        data.extend_from_slice(&FRAME_HEAD);
        data.extend_from_slice(&3i32.to_le_bytes());
        data.extend_from_slice(&[0xEE; 3 + 8]);
        data.extend(json_frame(r#"{"id":1}"#));
        // Trailing noise that also contains the head magic
        data.extend_from_slice(&FRAME_HEAD);
        data.extend_from_slice(&[0x42, 0x00]);

        parser.push(&data);
        assert_eq!(parser.drain(), vec![Command::json(r#"{"id":1}"#)]);
    }

    #[test]
    fn test_resync_after_corrupted_frame() {
        let mut parser = FrameParser::new();

        let mut corrupted = json_frame("broken");
        corrupted[10] ^= 0xFF;
        let genuine = json_frame("genuine");

        parser.push(&corrupted);
        parser.push(&genuine[..5]);
        assert!(parser.drain().is_empty());

        parser.push(&genuine[5..]);
        assert_eq!(parser.drain(), vec![Command::json("genuine")]);
        assert!(parser.is_empty());
    }

    #[test]
    fn test_truncated_frame_followed_by_genuine() {
        let mut parser = FrameParser::new();

        // Head + length of a short frame, cut off inside its body
        let truncated = &json_frame("ab")[..10];
        let mut data = truncated.to_vec();
        data.extend(json_frame("a genuine frame that is long enough to cover the window"));
        parser.push(&data);

        // The truncated candidate's window ends in the genuine frame's bytes,
        // fails validation, and the genuine head is found behind it
        assert_eq!(
            parser.drain(),
            vec![Command::json(
                "a genuine frame that is long enough to cover the window"
            )]
        );
    }

    #[test]
    fn test_negative_length_resyncs() {
        let mut parser = FrameParser::new();
        let mut data = FRAME_HEAD.to_vec();
        data.extend_from_slice(&(-1i32).to_le_bytes());
        data.extend(json_frame("after"));
        parser.push(&data);

        assert_eq!(parser.drain(), vec![Command::json("after")]);
    }

    #[test]
    fn test_oversized_length_resyncs() {
        let mut parser = FrameParser::with_max_body(64);
        let mut data = FRAME_HEAD.to_vec();
        data.extend_from_slice(&1_000_000i32.to_le_bytes());
        data.extend(json_frame("small"));
        parser.push(&data);

        assert_eq!(parser.drain(), vec![Command::json("small")]);
    }

    #[test]
    fn test_valid_frame_with_unknown_command_is_consumed() {
        let mut parser = FrameParser::new();
        let mut data = crate::protocol::encode_frame(&[9, 0, 1, 2]).unwrap().to_vec();
        data.extend(json_frame("ok"));
        parser.push(&data);

        assert_eq!(parser.drain(), vec![Command::json("ok")]);
        assert!(parser.is_empty());
    }

    #[test]
    fn test_flipped_body_byte_emits_nothing() {
        let mut parser = FrameParser::new();
        let mut frame = json_frame("integrity");
        frame[12] ^= 0x01;
        assert_eq!(&frame[frame.len() - 4..], &FRAME_TAIL);

        parser.push(&frame);
        assert!(parser.drain().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut parser = FrameParser::new();
        parser.push(&json_frame("x")[..5]);
        assert!(!parser.is_empty());
        parser.clear();
        assert!(parser.is_empty());
    }
}
