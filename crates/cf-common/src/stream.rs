//! Length-prefixed little-endian binary streams.
//!
//! The stream carries metadata maps, variant arrays and primitives
//! between ranks. Layout:
//! - integers and floats: fixed-width little-endian
//! - strings: `u64 length || bytes`
//! - variant arrays: `u8 kind || u64 length || raw elements`
//! - maps: `u64 nkeys || (key || u8 tag || value)*`
//!
//! Top-level payloads stamp a 4-byte type identifier so receivers can
//! reconstruct polymorphic content by name.

use crate::array::{ElementKind, VariantArray};
use crate::error::{CfError, CfResult};
use crate::metadata::{Metadata, Property};

const TAG_ARRAY: u8 = 0;
const TAG_MAP: u8 = 1;

/// Stream identifier for metadata payloads.
pub const IDENT_METADATA: [u8; 4] = *b"mtdt";
/// Stream identifier for Cartesian mesh payloads.
pub const IDENT_MESH: [u8; 4] = *b"mesh";

/// Append-only write cursor and sequential read cursor over a byte
/// buffer.
#[derive(Debug, Clone, Default)]
pub struct BinaryStream {
    buf: Vec<u8>,
    pos: usize,
}

macro_rules! impl_primitives {
    ($(($write:ident, $read:ident, $ty:ty)),* $(,)?) => {
        $(
            /// Append a fixed-width little-endian value.
            pub fn $write(&mut self, v: $ty) {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }

            /// Read a fixed-width little-endian value.
            pub fn $read(&mut self) -> CfResult<$ty> {
                let mut b = [0u8; std::mem::size_of::<$ty>()];
                b.copy_from_slice(self.read_exact(std::mem::size_of::<$ty>())?);
                Ok(<$ty>::from_le_bytes(b))
            }
        )*
    };
}

impl BinaryStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap received bytes for reading.
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Consume the stream, returning the underlying bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// The underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Total number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reset the read cursor to the beginning.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn read_exact(&mut self, n: usize) -> CfResult<&[u8]> {
        if self.remaining() < n {
            return Err(CfError::Serialization(format!(
                "stream truncated: need {} bytes, {} remain",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    impl_primitives!(
        (write_u8, read_u8, u8),
        (write_u16, read_u16, u16),
        (write_u32, read_u32, u32),
        (write_u64, read_u64, u64),
        (write_i8, read_i8, i8),
        (write_i16, read_i16, i16),
        (write_i32, read_i32, i32),
        (write_i64, read_i64, i64),
        (write_f32, read_f32, f32),
        (write_f64, read_f64, f64),
    );

    /// Append a length-prefixed string.
    pub fn write_string(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write_bytes(s.as_bytes());
    }

    /// Read a length-prefixed string.
    pub fn read_string(&mut self) -> CfResult<String> {
        let n = self.read_u64()? as usize;
        let bytes = self.read_exact(n)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CfError::Serialization(format!("invalid utf-8 in stream: {}", e)))
    }

    /// Stamp a 4-byte type identifier.
    pub fn write_ident(&mut self, ident: [u8; 4]) {
        self.write_bytes(&ident);
    }

    /// Read and check a 4-byte type identifier.
    pub fn expect_ident(&mut self, ident: [u8; 4]) -> CfResult<()> {
        let got = self.read_exact(4)?;
        if got != ident {
            return Err(CfError::Serialization(format!(
                "type identifier mismatch: expected {:?}, found {:?}",
                ident, got
            )));
        }
        Ok(())
    }

    /// Append a variant array: kind tag, length, raw elements.
    pub fn write_array(&mut self, array: &VariantArray) {
        self.write_u8(array.type_code());
        self.write_u64(array.len() as u64);
        match array {
            VariantArray::I8(v) => v.iter().for_each(|x| self.write_i8(*x)),
            VariantArray::I16(v) => v.iter().for_each(|x| self.write_i16(*x)),
            VariantArray::I32(v) => v.iter().for_each(|x| self.write_i32(*x)),
            VariantArray::I64(v) => v.iter().for_each(|x| self.write_i64(*x)),
            VariantArray::U8(v) => self.write_bytes(v),
            VariantArray::U16(v) => v.iter().for_each(|x| self.write_u16(*x)),
            VariantArray::U32(v) => v.iter().for_each(|x| self.write_u32(*x)),
            VariantArray::U64(v) => v.iter().for_each(|x| self.write_u64(*x)),
            VariantArray::F32(v) => v.iter().for_each(|x| self.write_f32(*x)),
            VariantArray::F64(v) => v.iter().for_each(|x| self.write_f64(*x)),
            VariantArray::Str(v) => v.iter().for_each(|x| self.write_string(x)),
        }
    }

    /// Read a variant array written by [`write_array`](Self::write_array).
    pub fn read_array(&mut self) -> CfResult<VariantArray> {
        let code = self.read_u8()?;
        let kind = ElementKind::from_type_code(code).ok_or_else(|| {
            CfError::Serialization(format!("unknown element kind tag {}", code))
        })?;
        let n = self.read_u64()? as usize;

        macro_rules! read_vec {
            ($read:ident, $width:expr) => {{
                self.check_claim(n, $width)?;
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push(self.$read()?);
                }
                VariantArray::from(v)
            }};
        }

        Ok(match kind {
            ElementKind::I8 => read_vec!(read_i8, 1),
            ElementKind::I16 => read_vec!(read_i16, 2),
            ElementKind::I32 => read_vec!(read_i32, 4),
            ElementKind::I64 => read_vec!(read_i64, 8),
            ElementKind::U8 => read_vec!(read_u8, 1),
            ElementKind::U16 => read_vec!(read_u16, 2),
            ElementKind::U32 => read_vec!(read_u32, 4),
            ElementKind::U64 => read_vec!(read_u64, 8),
            ElementKind::F32 => read_vec!(read_f32, 4),
            ElementKind::F64 => read_vec!(read_f64, 8),
            ElementKind::Str => {
                self.check_claim(n, 8)?;
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push(self.read_string()?);
                }
                VariantArray::Str(v)
            }
        })
    }

    // A corrupt length must fail before it drives an allocation.
    fn check_claim(&self, n: usize, width: usize) -> CfResult<()> {
        let need = n
            .checked_mul(width)
            .ok_or_else(|| CfError::Serialization("length overflow in stream".to_string()))?;
        if need > self.remaining() {
            return Err(CfError::Serialization(format!(
                "stream claims {} elements but only {} bytes remain",
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    /// Append a metadata map: key count, then (key, tag, value) triples
    /// in insertion order.
    pub fn write_metadata(&mut self, md: &Metadata) {
        self.write_u64(md.len() as u64);
        for (key, prop) in md.iter() {
            self.write_string(key);
            match prop {
                Property::Array(a) => {
                    self.write_u8(TAG_ARRAY);
                    self.write_array(a);
                }
                Property::Map(m) => {
                    self.write_u8(TAG_MAP);
                    self.write_metadata(m);
                }
            }
        }
    }

    /// Read a metadata map written by [`write_metadata`](Self::write_metadata).
    pub fn read_metadata(&mut self) -> CfResult<Metadata> {
        let n = self.read_u64()? as usize;
        let mut md = Metadata::new();
        for _ in 0..n {
            let key = self.read_string()?;
            let tag = self.read_u8()?;
            match tag {
                TAG_ARRAY => md.insert(&key, self.read_array()?),
                TAG_MAP => md.insert(&key, self.read_metadata()?),
                _ => {
                    return Err(CfError::Serialization(format!(
                        "unknown property tag {} for key \"{}\"",
                        tag, key
                    )))
                }
            }
        }
        Ok(md)
    }
}

impl Metadata {
    /// Serialize with the metadata type stamp.
    pub fn to_stream(&self, stream: &mut BinaryStream) {
        stream.write_ident(IDENT_METADATA);
        stream.write_metadata(self);
    }

    /// Reconstruct a map serialized by [`to_stream`](Self::to_stream).
    pub fn from_stream(stream: &mut BinaryStream) -> CfResult<Metadata> {
        stream.expect_ident(IDENT_METADATA)?;
        stream.read_metadata()
    }
}
