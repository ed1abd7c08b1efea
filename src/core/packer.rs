//! # Primitive Codec
//!
//! Fixed-width little-endian encoding of scalars and length-prefixed UTF-8
//! strings over any [`bytes::BufMut`] (writing) or [`bytes::Buf`] (reading).
//!
//! Reads never treat a short buffer as an empty value: asking for more bytes
//! than remain is an [`std::io::ErrorKind::UnexpectedEof`] error.
//!
//! ```rust
//! use bytes::BytesMut;
//! use objwire::core::packer::Packer;
//!
//! let mut out = Packer::new(BytesMut::new());
//! out.write_f32(1.236);
//! out.write_string("hi").unwrap();
//!
//! let mut input = Packer::new(out.into_inner().freeze());
//! assert_eq!(input.read_f32().unwrap(), 1.236);
//! assert_eq!(input.read_string().unwrap(), "hi");
//! ```

use crate::core::primitives::{Decimal, Timestamp};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes};
use std::io;
use uuid::Uuid;

/// Primitive reader/writer wrapping a byte buffer.
#[derive(Debug, Default)]
pub struct Packer<B> {
    inner: B,
}

impl<B> Packer<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &B {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut B {
        &mut self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: BufMut> Packer<B> {
    pub fn write_bool(&mut self, value: bool) {
        self.inner.put_u8(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.inner.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.inner.put_i8(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.inner.put_i16_le(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.inner.put_u16_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.inner.put_i32_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.inner.put_u32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.inner.put_i64_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.inner.put_u64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.inner.put_f32_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.inner.put_f64_le(value);
    }

    pub fn write_decimal(&mut self, value: &Decimal) {
        for word in value.parts() {
            self.inner.put_u32_le(word);
        }
    }

    pub fn write_guid(&mut self, value: &Uuid) {
        self.inner.put_slice(&value.to_bytes_le());
    }

    pub fn write_timestamp(&mut self, value: Timestamp) {
        self.inner.put_i64_le(value.ticks());
    }

    /// Write an Int32 byte length followed by the UTF-8 bytes.
    ///
    /// # Errors
    /// `InvalidArgument` if the string is longer than `i32::MAX` bytes.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = i32::try_from(value.len()).map_err(|_| {
            ProtocolError::InvalidArgument(format!("string of {} bytes too long", value.len()))
        })?;
        self.inner.put_i32_le(len);
        self.inner.put_slice(value.as_bytes());
        Ok(())
    }

    /// Append raw bytes with no prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.inner.put_slice(bytes);
    }
}

impl<B: Buf> Packer<B> {
    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    fn require(&self, len: usize) -> Result<()> {
        let remaining = self.inner.remaining();
        if remaining < len {
            return Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("needed {len} bytes, {remaining} available"),
            )));
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.require(1)?;
        Ok(self.inner.get_u8() != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        Ok(self.inner.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.require(1)?;
        Ok(self.inner.get_i8())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.require(2)?;
        Ok(self.inner.get_i16_le())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.require(2)?;
        Ok(self.inner.get_u16_le())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.require(4)?;
        Ok(self.inner.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.require(4)?;
        Ok(self.inner.get_u32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.require(8)?;
        Ok(self.inner.get_i64_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.require(8)?;
        Ok(self.inner.get_u64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.require(4)?;
        Ok(self.inner.get_f32_le())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.require(8)?;
        Ok(self.inner.get_f64_le())
    }

    pub fn read_decimal(&mut self) -> Result<Decimal> {
        self.require(16)?;
        let lo = self.inner.get_u32_le();
        let mid = self.inner.get_u32_le();
        let hi = self.inner.get_u32_le();
        let flags = self.inner.get_u32_le();
        Decimal::from_parts(lo, mid, hi, flags)
    }

    pub fn read_guid(&mut self) -> Result<Uuid> {
        self.require(16)?;
        let mut raw = [0u8; 16];
        self.inner.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes_le(raw))
    }

    pub fn read_timestamp(&mut self) -> Result<Timestamp> {
        self.require(8)?;
        Ok(Timestamp::from_ticks(self.inner.get_i64_le()))
    }

    /// Read an Int32 length prefix, rejecting negative values.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::DataIntegrity(constants::ERR_NEGATIVE_LENGTH.into()))?;
        Ok(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        if len == 0 {
            return Ok(String::new());
        }
        self.require(len)?;
        let raw = self.inner.copy_to_bytes(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| ProtocolError::DataIntegrity(constants::ERR_INVALID_UTF8.into()))
    }

    /// Take exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<Bytes> {
        self.require(len)?;
        Ok(self.inner.copy_to_bytes(len))
    }

    /// Take everything that is left.
    pub fn read_rest(&mut self) -> Bytes {
        let len = self.inner.remaining();
        self.inner.copy_to_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_fixed_widths() {
        let mut p = Packer::new(BytesMut::new());
        p.write_bool(true);
        p.write_i16(-2);
        p.write_i32(7);
        p.write_u64(u64::MAX);
        p.write_f64(-0.5);
        assert_eq!(p.get_ref().len(), 1 + 2 + 4 + 8 + 8);

        let mut r = Packer::new(p.into_inner().freeze());
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_i32().unwrap(), 7);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_f64().unwrap(), -0.5);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut p = Packer::new(Vec::new());
        p.write_i32(0x0102_0304);
        assert_eq!(p.into_inner(), vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_string_prefix() {
        let mut p = Packer::new(Vec::new());
        p.write_string("héllo").unwrap();
        p.write_string("").unwrap();
        let bytes = p.into_inner();
        assert_eq!(&bytes[..4], &6i32.to_le_bytes());
        assert_eq!(&bytes[10..], &0i32.to_le_bytes());

        let mut r = Packer::new(&bytes[..]);
        assert_eq!(r.read_string().unwrap(), "héllo");
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn test_short_read_is_eof() {
        let mut r = Packer::new(&[1u8, 2, 3][..]);
        match r.read_i32() {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_string_body() {
        let mut p = Packer::new(Vec::new());
        p.write_i32(10);
        p.write_raw(b"abc");
        let bytes = p.into_inner();
        let mut r = Packer::new(&bytes[..]);
        assert!(matches!(r.read_string(), Err(ProtocolError::Io(_))));
    }

    #[test]
    fn test_negative_string_length() {
        let bytes = (-1i32).to_le_bytes();
        let mut r = Packer::new(&bytes[..]);
        assert!(matches!(
            r.read_string(),
            Err(ProtocolError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_guid_layout_matches_mixed_endian() {
        let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let mut p = Packer::new(Vec::new());
        p.write_guid(&id);
        let bytes = p.into_inner();
        assert_eq!(&bytes[..4], &[0x33, 0x22, 0x11, 0x00]);
        assert_eq!(Packer::new(&bytes[..]).read_guid().unwrap(), id);
    }
}
