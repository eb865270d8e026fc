use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;

/// Version written after every magic. Readers reject anything else.
pub const FORMAT_VERSION: u32 = 1;

const MAX_STRING_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("stream is truncated")]
    Truncated,
    #[error("invalid magic: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },
    #[error("unsupported version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("string of {len} bytes exceeds the length prefix")]
    StringTooLong { len: usize },
    #[error("string is not utf-8")]
    InvalidUtf8,
    #[error("{what} count {count} exceeds the remaining stream")]
    CountTooLarge { what: &'static str, count: usize },
    #[error("{what} count {count} does not fit in u32")]
    CountOverflow { what: &'static str, count: usize },
}

impl From<std::io::Error> for CodecError {
    fn from(_: std::io::Error) -> Self {
        // Reads only fail on a short in-memory buffer.
        CodecError::Truncated
    }
}

/// Append-only little-endian stream.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a stream with `magic` and the current format version.
    pub fn with_header(magic: &[u8; 4]) -> Self {
        let mut writer = Self::new();
        writer.bytes(magic);
        writer.u32(FORMAT_VERSION);
        writer
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn u32(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn i32(&mut self, value: i32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_i32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn f32(&mut self, value: f32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_f32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn vec2(&mut self, value: [f32; 2]) {
        self.f32(value[0]);
        self.f32(value[1]);
    }

    pub fn vec3(&mut self, value: [f32; 3]) {
        for component in value {
            self.f32(component);
        }
    }

    pub fn vec4(&mut self, value: [f32; 4]) {
        for component in value {
            self.f32(component);
        }
    }

    /// Writes a `usize` count as `u32`.
    pub fn count(&mut self, what: &'static str, count: usize) -> Result<(), CodecError> {
        let value = u32::try_from(count).map_err(|_| CodecError::CountOverflow { what, count })?;
        self.u32(value);
        Ok(())
    }

    /// Writes a `u16` length prefix followed by the utf-8 bytes.
    pub fn string(&mut self, value: &str) -> Result<(), CodecError> {
        let len = value.len();
        if len > MAX_STRING_LEN {
            return Err(CodecError::StringTooLong { len });
        }
        self.u16(len as u16);
        self.bytes(value.as_bytes());
        Ok(())
    }

    /// Overwrites a `u32` previously written at `offset`.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<(), CodecError> {
        let end = offset.checked_add(4).ok_or(CodecError::Truncated)?;
        let slot = self.buf.get_mut(offset..end).ok_or(CodecError::Truncated)?;
        LittleEndian::write_u32(slot, value);
        Ok(())
    }
}

/// Bounds-checked little-endian reader over an in-memory stream.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Checks `magic` and the format version, leaving the reader after both.
    pub fn with_header(data: &'a [u8], magic: &[u8; 4]) -> Result<Self, CodecError> {
        let mut reader = Self::new(data);
        let found = reader.array4()?;
        if &found != magic {
            return Err(CodecError::InvalidMagic {
                expected: *magic,
                found,
            });
        }
        let version = reader.u32()?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(reader)
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    pub fn array4(&mut self) -> Result<[u8; 4], CodecError> {
        let slice = self.bytes(4)?;
        Ok([slice[0], slice[1], slice[2], slice[3]])
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let start = self.position();
        let end = start.checked_add(len).ok_or(CodecError::Truncated)?;
        let data: &'a [u8] = *self.cursor.get_ref();
        let slice = data.get(start..end).ok_or(CodecError::Truncated)?;
        self.cursor.set_position(end as u64);
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.cursor.read_u8()?)
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    pub fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(self.cursor.read_f32::<LittleEndian>()?)
    }

    pub fn vec2(&mut self) -> Result<[f32; 2], CodecError> {
        Ok([self.f32()?, self.f32()?])
    }

    pub fn vec3(&mut self) -> Result<[f32; 3], CodecError> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }

    pub fn vec4(&mut self) -> Result<[f32; 4], CodecError> {
        Ok([self.f32()?, self.f32()?, self.f32()?, self.f32()?])
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(text.to_string())
    }

    /// Reads a `u32` element count, rejecting counts whose records cannot fit
    /// in the rest of the stream.
    pub fn count(&mut self, what: &'static str, min_stride: usize) -> Result<usize, CodecError> {
        let count = self.u32()? as usize;
        let needed = count.saturating_mul(min_stride.max(1));
        if needed > self.remaining() {
            return Err(CodecError::CountTooLarge { what, count });
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_checked() {
        let writer = Writer::with_header(b"TEST");
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[0..4], b"TEST");
        assert!(Reader::with_header(&bytes, b"TEST").is_ok());
        let err = Reader::with_header(&bytes, b"NOPE").expect_err("magic should fail");
        assert!(matches!(err, CodecError::InvalidMagic { .. }));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut writer = Writer::new();
        writer.bytes(b"TEST");
        writer.u32(FORMAT_VERSION + 1);
        let bytes = writer.into_bytes();
        let err = Reader::with_header(&bytes, b"TEST").expect_err("version should fail");
        assert_eq!(
            err,
            CodecError::UnsupportedVersion {
                found: FORMAT_VERSION + 1,
                expected: FORMAT_VERSION
            }
        );
    }

    #[test]
    fn typed_records_are_little_endian() {
        let mut writer = Writer::new();
        writer.u32(0x0102_0304);
        writer.i32(-2);
        writer.string("grass").expect("string");
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[0..4], &[4, 3, 2, 1]);

        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.u32().expect("u32"), 0x0102_0304);
        assert_eq!(reader.i32().expect("i32"), -2);
        assert_eq!(reader.string().expect("string"), "grass");
        assert!(reader.is_at_end());
    }

    #[test]
    fn truncated_stream_fails() {
        let bytes = [1u8, 2, 3];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.u32(), Err(CodecError::Truncated));
    }

    #[test]
    fn oversized_count_is_rejected() {
        let mut writer = Writer::new();
        writer.u32(1_000_000);
        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);
        let err = reader.count("vertices", 12).expect_err("count should fail");
        assert!(matches!(err, CodecError::CountTooLarge { .. }));
    }

    #[test]
    fn patch_overwrites_slot() {
        let mut writer = Writer::new();
        writer.u32(0);
        writer.patch_u32(0, 7).expect("patch");
        assert!(writer.patch_u32(2, 7).is_err());
        let bytes = writer.into_bytes();
        assert_eq!(Reader::new(&bytes).u32().expect("u32"), 7);
    }
}
