//! Linear byte cursor for command bodies.
//!
//! [`ByteWriter`] appends values to a growable buffer; [`ByteReader`] consumes
//! them from a fixed slice in the same order. All multi-byte values are
//! Little Endian on both sides.
//!
//! Variable-length values carry a 4-byte signed count first:
//! ```text
//! ┌────────────┬──────────────────────────────┐
//! │ Count      │ Data                         │
//! │ 4 bytes LE │ count bytes (raw or UTF-16LE)│
//! └────────────┴──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tcpwire::codec::{ByteReader, ByteWriter};
//!
//! let mut writer = ByteWriter::new();
//! writer.write_u16(7);
//! writer.write_string("héllo").unwrap();
//! let bytes = writer.into_bytes();
//!
//! let mut reader = ByteReader::new(&bytes);
//! assert_eq!(reader.read_u16().unwrap(), 7);
//! assert_eq!(reader.read_string().unwrap(), "héllo");
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TcpwireError};

/// Size of the count written before byte arrays and strings.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Write cursor accumulating values into a growable buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    #[inline]
    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Write a length-prefixed byte array.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the array is longer than `i32::MAX`.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let count = length_prefix("write_bytes", data.len())?;
        self.buf.reserve(LENGTH_PREFIX_SIZE + data.len());
        self.buf.put_i32_le(count);
        self.buf.put_slice(data);
        Ok(())
    }

    /// Write a length-prefixed UTF-16LE string.
    ///
    /// The count is the number of encoded bytes, not characters.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let count = length_prefix("write_string", units.len() * 2)?;
        self.buf.reserve(LENGTH_PREFIX_SIZE + units.len() * 2);
        self.buf.put_i32_le(count);
        for unit in units {
            self.buf.put_u16_le(unit);
        }
        Ok(())
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the written bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freeze the written bytes (zero-copy).
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

fn length_prefix(op: &'static str, len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        TcpwireError::Protocol(format!("{}: length {} exceeds i32::MAX", op, len))
    })
}

/// Read cursor consuming values from a fixed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume exactly `n` bytes or fail naming `op`.
    fn take(&mut self, op: &'static str, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(TcpwireError::Decode(format!(
                "{}: need {} bytes at offset {}, {} remaining",
                op,
                n,
                self.pos,
                self.remaining()
            )));
        }
        let chunk = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(chunk)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take("read_u8", 1)?.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.take("read_u16", 2)?.get_u16_le())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.take("read_i32", 4)?.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.take("read_u32", 4)?.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.take("read_u64", 8)?.get_u64_le())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(self.take("read_f64", 8)?.get_f64_le())
    }

    /// Read a length-prefixed byte array (borrowed from the input).
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_length("read_bytes")?;
        self.take("read_bytes", len)
    }

    /// Read a length-prefixed UTF-16LE string.
    ///
    /// Unpaired surrogates are replaced with U+FFFD and a trailing odd byte
    /// is ignored, so any well-framed string decodes.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_length("read_string")?;
        let raw = self.take("read_string", len)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    fn read_length(&mut self, op: &'static str) -> Result<usize> {
        let len = self
            .take(op, LENGTH_PREFIX_SIZE)?
            .get_i32_le();
        usize::try_from(len)
            .map_err(|_| TcpwireError::Decode(format!("{}: negative length {}", op, len)))
    }
}
