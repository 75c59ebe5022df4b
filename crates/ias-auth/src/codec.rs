//! Big-endian binary encoding used by the credential store and sealed secrets.
//!
//! Strings are `u16` length-prefixed UTF-8, UUIDs are two `u64` halves
//! (most significant first).

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::errors::CodecError;

#[derive(Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_utf(&mut self, value: &str) -> Result<(), CodecError> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::StringTooLong(value.len()))?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_uuid(&mut self, value: Uuid) {
        let (most, least) = value.as_u64_pair();
        self.buf.put_u64(most);
        self.buf.put_u64(least);
    }

    /// Writes `data` prefixed with its `u32` length.
    pub fn put_blob(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(data.len()).map_err(|_| CodecError::StringTooLong(data.len()))?;
        self.buf.put_u32(len);
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        Vec::from(self.buf)
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn get_bool(&mut self) -> Result<bool, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_utf(&mut self) -> Result<String, CodecError> {
        let len = usize::from(self.get_u16()?);
        let bytes = self.get_raw(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn get_uuid(&mut self) -> Result<Uuid, CodecError> {
        self.ensure(16)?;
        let most = self.buf.get_u64();
        let least = self.buf.get_u64();
        Ok(Uuid::from_u64_pair(most, least))
    }

    pub fn get_blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.get_u32()? as usize;
        self.get_raw(len)
    }

    pub fn get_raw(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Fails if any bytes are left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(CodecError::Trailing(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_big_endian() {
        let mut w = Writer::new();
        w.put_u16(0x0102);
        w.put_utf("ab").unwrap();
        w.put_bool(true);
        assert_eq!(w.into_vec(), vec![0x01, 0x02, 0x00, 0x02, b'a', b'b', 0x01]);
    }

    #[test]
    fn test_uuid_halves() {
        let uuid = Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap();
        let mut w = Writer::new();
        w.put_uuid(uuid);
        let bytes = w.into_vec();
        assert_eq!(&bytes[..], uuid.as_bytes());
        assert_eq!(Reader::new(&bytes).get_uuid().unwrap(), uuid);
    }

    #[test]
    fn test_truncated_input() {
        let mut r = Reader::new(&[0x00, 0x05, b'a']);
        assert_eq!(
            r.get_utf(),
            Err(CodecError::UnexpectedEof { needed: 5, remaining: 1 })
        );
    }

    #[test]
    fn test_trailing_bytes() {
        let mut r = Reader::new(&[0x01, 0xFF]);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.finish(), Err(CodecError::Trailing(1)));
    }

    #[test]
    fn test_oversized_string() {
        let long = "x".repeat(usize::from(u16::MAX) + 1);
        assert_eq!(
            Writer::new().put_utf(&long),
            Err(CodecError::StringTooLong(long.len()))
        );
    }
}
