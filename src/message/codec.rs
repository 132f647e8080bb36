//! Message field codec
//!
//! Provides the little-endian byte writer and reader that messages use to
//! serialize their fields:
//! - Fixed-width integers, floats and booleans
//! - Length-prefixed strings and byte blobs (u32 prefix)
//! - Sequences and optional values through [`WireValue`]

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Values that can be written to a [`MessageWriter`] and read back from a
/// [`MessageReader`].
pub trait WireValue: Sized {
    /// Append this value to the writer
    fn write_to(&self, writer: &mut MessageWriter);

    /// Read a value of this type from the reader
    fn read_from(reader: &mut MessageReader<'_>) -> Result<Self, ProtocolError>;
}

/// Growable little-endian writer for message fields
#[derive(Debug, Clone, Default)]
pub struct MessageWriter {
    data: BytesMut,
}

impl MessageWriter {
    /// Create a new empty writer
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
        }
    }

    /// Create a writer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    // ============ Properties ============

    /// Number of bytes written so far
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the written bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the underlying BytesMut
    #[inline]
    pub fn into_inner(self) -> BytesMut {
        self.data
    }

    /// Freeze the written bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    // ============ Generic ============

    /// Write any [`WireValue`]
    pub fn write<T: WireValue>(&mut self, value: &T) {
        value.write_to(self);
    }

    // ============ Primitives ============

    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.put_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.put_i16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.put_i64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.put_f32_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.data.put_f64_le(value);
    }

    /// Overwrite four bytes at `pos` with a little-endian u32.
    ///
    /// Panics if `pos + 4` is past the end of the written data.
    pub fn patch_u32(&mut self, pos: usize, value: u32) {
        self.data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ============ Variable Length ============

    /// Write a UTF-8 string with a u32 length prefix
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Write a byte blob with a u32 length prefix
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.data.put_u32_le(value.len() as u32);
        self.data.put_slice(value);
    }

    /// Write raw bytes without a length prefix
    pub fn write_raw(&mut self, value: &[u8]) {
        self.data.put_slice(value);
    }
}

/// Little-endian reader over a borrowed payload
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    read_pos: usize,
}

impl<'a> MessageReader<'a> {
    /// Create a reader over a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, read_pos: 0 }
    }

    /// Get the current read position
    #[inline]
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Check if there are bytes remaining to read
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Read any [`WireValue`]
    pub fn read_value<T: WireValue>(&mut self) -> Result<T, ProtocolError> {
        T::read_from(self)
    }

    /// Take the next `length` bytes without copying
    pub fn read_raw(&mut self, length: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < length {
            return Err(ProtocolError::UnexpectedEof {
                needed: length,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.read_pos..self.read_pos + length];
        self.read_pos += length;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_raw(N)?);
        Ok(out)
    }

    // ============ Primitives ============

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::MalformedFrame(format!(
                "invalid boolean byte {}",
                other
            ))),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    // ============ Variable Length ============

    /// Read a u32-length-prefixed byte blob
    pub fn read_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let length = self.read_u32()? as usize;
        self.read_raw(length)
    }

    /// Read a u32-length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidStringEncoding)
    }
}

macro_rules! impl_wire_primitive {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl WireValue for $ty {
                fn write_to(&self, writer: &mut MessageWriter) {
                    writer.$write(*self);
                }

                fn read_from(reader: &mut MessageReader<'_>) -> Result<Self, ProtocolError> {
                    reader.$read()
                }
            }
        )*
    };
}

impl_wire_primitive! {
    u8 => write_u8, read_u8;
    i8 => write_i8, read_i8;
    bool => write_bool, read_bool;
    u16 => write_u16, read_u16;
    i16 => write_i16, read_i16;
    u32 => write_u32, read_u32;
    i32 => write_i32, read_i32;
    u64 => write_u64, read_u64;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl WireValue for String {
    fn write_to(&self, writer: &mut MessageWriter) {
        writer.write_str(self);
    }

    fn read_from(reader: &mut MessageReader<'_>) -> Result<Self, ProtocolError> {
        reader.read_string()
    }
}

impl WireValue for Bytes {
    fn write_to(&self, writer: &mut MessageWriter) {
        writer.write_bytes(self);
    }

    fn read_from(reader: &mut MessageReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Bytes::copy_from_slice(reader.read_bytes()?))
    }
}

// Sequences carry a u32 element count. `Vec<u8>` goes through this path too,
// which costs one length prefix per element instead of per byte.
impl<T: WireValue> WireValue for Vec<T> {
    fn write_to(&self, writer: &mut MessageWriter) {
        writer.write_u32(self.len() as u32);
        for item in self {
            item.write_to(writer);
        }
    }

    fn read_from(reader: &mut MessageReader<'_>) -> Result<Self, ProtocolError> {
        let count = reader.read_u32()? as usize;
        // Every element takes at least one byte, so a count above the
        // remaining length can only be garbage.
        if count > reader.remaining() {
            return Err(ProtocolError::UnexpectedEof {
                needed: count,
                remaining: reader.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::read_from(reader)?);
        }
        Ok(items)
    }
}

impl<T: WireValue> WireValue for Option<T> {
    fn write_to(&self, writer: &mut MessageWriter) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write_to(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn read_from(reader: &mut MessageReader<'_>) -> Result<Self, ProtocolError> {
        if reader.read_bool()? {
            Ok(Some(T::read_from(reader)?))
        } else {
            Ok(None)
        }
    }
}
