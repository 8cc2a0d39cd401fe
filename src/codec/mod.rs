//! Codec module - binary serialization for command bodies.
//!
//! - [`ByteWriter`] - write cursor over a growable buffer
//! - [`ByteReader`] - read cursor over a fixed slice
//!
//! Every multi-byte value is Little Endian on both sides.

mod serializer;

pub use serializer::{ByteReader, ByteWriter, LENGTH_PREFIX_SIZE};
