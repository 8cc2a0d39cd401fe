//! Command model - the logical payload carried in a frame body.
//!
//! Every command starts with a 2-byte type tag followed by its data:
//! ```text
//! ┌──────────┬───────────────────────────────────────────┐
//! │ Type tag │ Data                                      │
//! │ uint16 LE│ Json: UTF-16 string | Binary: byte array  │
//! └──────────┴───────────────────────────────────────────┘
//! ```

use bytes::Bytes;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::Result;

/// Size of the type tag at the start of every body.
pub const TYPE_TAG_SIZE: usize = 2;

/// Discriminant written first in a command body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandType {
    Json = 0,
    Binary = 1,
}

impl CommandType {
    /// Map a wire tag to a command type. Unknown tags yield `None`.
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(Self::Json),
            1 => Some(Self::Binary),
            _ => None,
        }
    }

    #[inline]
    pub fn tag(self) -> u16 {
        self as u16
    }
}

/// A decoded command. Built fresh per frame and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// JSON request or response document.
    Json(String),
    /// Opaque binary payload.
    Binary(Bytes),
}

impl Command {
    /// Create a JSON command.
    pub fn json(data: impl Into<String>) -> Self {
        Self::Json(data.into())
    }

    /// Create a binary command.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Json(_) => CommandType::Json,
            Self::Binary(_) => CommandType::Binary,
        }
    }

    /// Write the tag and payload to `writer`.
    pub fn write(&self, writer: &mut ByteWriter) -> Result<()> {
        writer.write_u16(self.command_type().tag());
        match self {
            Self::Json(data) => writer.write_string(data),
            Self::Binary(data) => writer.write_bytes(data),
        }
    }

    /// Read a command of the given type from `reader`.
    ///
    /// Consumes the tag again so the cursor layout mirrors [`Command::write`].
    pub fn read(kind: CommandType, reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_u16()?;
        match kind {
            CommandType::Json => Ok(Self::Json(reader.read_string()?)),
            CommandType::Binary => Ok(Self::Binary(Bytes::copy_from_slice(
                reader.read_bytes()?,
            ))),
        }
    }

    /// Serialize into a frame body.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let capacity = TYPE_TAG_SIZE
            + 4
            + match self {
                Self::Json(data) => data.len() * 2,
                Self::Binary(data) => data.len(),
            };
        let mut writer = ByteWriter::with_capacity(capacity);
        self.write(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decode a command from a frame body.
    ///
    /// The tag is peeked before anything is constructed. Bodies shorter than
    /// the tag, unknown tags and truncated payloads all yield `None`.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.len() < TYPE_TAG_SIZE {
            return None;
        }
        let tag = u16::from_le_bytes([body[0], body[1]]);
        let Some(kind) = CommandType::from_tag(tag) else {
            tracing::debug!("Unknown command tag {}", tag);
            return None;
        };

        match Self::read(kind, &mut ByteReader::new(body)) {
            Ok(command) => Some(command),
            Err(e) => {
                tracing::debug!("Dropping undecodable {:?} command: {}", kind, e);
                None
            }
        }
    }

    /// JSON text if this is a JSON command.
    pub fn as_json(&self) -> Option<&str> {
        match self {
            Self::Json(data) => Some(data),
            Self::Binary(_) => None,
        }
    }
}
