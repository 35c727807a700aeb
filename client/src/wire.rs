//! Frame layout primitives.
//!
//! Every request and response starts with the same four byte header:
//! a little-endian u16 session id, a u8 request id and a u8 command byte.
//! Responses add a status byte at offset 4. All multi-byte integers in
//! payloads are little-endian regardless of host byte order; strings are
//! NUL-terminated with no length prefix.

use crate::error::{Error, Result};

pub(crate) const HEADER_LEN: usize = 4;
pub(crate) const STATUS_OFFSET: usize = 4;

/// The header at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub session_id: u16,
    pub request_id: u8,
    pub opcode: u8,
}

impl Header {
    pub fn write_to(self, buf: &mut [u8]) {
        let [s0, s1] = self.session_id.to_le_bytes();

        buf[0] = s0;
        buf[1] = s1;
        buf[2] = self.request_id;
        buf[3] = self.opcode;
    }

    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            session_id: u16::from_le_bytes([buf[0], buf[1]]),
            request_id: buf[2],
            opcode: buf[3],
        }
    }
}

/// Appends payload fields to a request frame, bounds-checked against the
/// session buffer.
pub(crate) struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    pub fn new(buf: &'a mut [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Total frame length composed so far, header included.
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put_bytes(&[value])
    }

    pub fn put_u16_le(&mut self, value: u16) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32_le(&mut self, value: u32) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos.checked_add(bytes.len()).filter(|end| *end <= self.buf.len());

        let Some(end) = end else {
            return Err(Error::FrameTooLarge {
                capacity: self.buf.len(),
            });
        };

        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;

        Ok(())
    }

    /// Appends `s` followed by a NUL terminator.
    pub fn put_cstr(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(Error::InteriorNul);
        }

        self.put_bytes(s.as_bytes())?;
        self.put_u8(0)?;

        Ok(())
    }
}

/// Reads payload fields out of a reply frame.
///
/// The reader is bounded by the received length, so a reply that is shorter
/// than the command requires surfaces as [`Error::Malformed`] instead of
/// parsing stale bytes from a previous exchange.
pub(crate) struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;

        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;

        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());

        let Some(end) = end else {
            return Err(Error::Malformed("reply ended unexpectedly"));
        };

        let bytes = &self.buf[self.pos..end];
        self.pos = end;

        Ok(bytes)
    }

    /// Reads up to the next NUL terminator; the terminator is consumed but
    /// not part of the returned slice.
    pub fn cstr(&mut self) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];

        let Some(nul) = rest.iter().position(|byte| *byte == 0) else {
            return Err(Error::Malformed("string in reply is not NUL-terminated"));
        };

        self.pos += nul + 1;

        Ok(&rest[..nul])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_strategy::proptest]
    fn header_survives_reencoding(session_id: u16, request_id: u8, opcode: u8) {
        let header = Header {
            session_id,
            request_id,
            opcode,
        };

        let mut buf = [0u8; HEADER_LEN];
        header.write_to(&mut buf);

        assert_eq!(Header::read_from(&buf), header);
    }

    #[test_strategy::proptest]
    fn cstr_survives_reencoding(#[strategy("[a-zA-Z0-9 ._-]{0,64}")] s: String) {
        let mut buf = [0u8; 128];
        let mut writer = FrameWriter::new(&mut buf, 0);
        writer.put_cstr(&s).unwrap();
        let len = writer.len();

        let mut reader = FrameReader::new(&buf[..len], 0);

        assert_eq!(reader.cstr().unwrap(), s.as_bytes());
        assert_eq!(reader.pos(), len);
    }

    #[test]
    fn integers_are_little_endian() {
        let mut buf = [0u8; 16];
        let mut writer = FrameWriter::new(&mut buf, 0);
        writer.put_u16_le(0x1234).unwrap();
        writer.put_u32_le(0x1122_3344).unwrap();

        assert_eq!(&buf[..6], &[0x34, 0x12, 0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn writer_refuses_overflow() {
        let mut buf = [0u8; 8];
        let mut writer = FrameWriter::new(&mut buf, 4);

        writer.put_u32_le(1).unwrap();

        assert!(matches!(
            writer.put_u8(0),
            Err(Error::FrameTooLarge { capacity: 8 })
        ));
    }

    #[test]
    fn writer_refuses_interior_nul() {
        let mut buf = [0u8; 8];
        let mut writer = FrameWriter::new(&mut buf, 0);

        assert!(matches!(writer.put_cstr("a\0b"), Err(Error::InteriorNul)));
    }

    #[test]
    fn reader_reports_truncation() {
        let buf = [0u8; 3];
        let mut reader = FrameReader::new(&buf, 0);

        assert!(reader.u16_le().is_ok());
        assert!(matches!(reader.u32_le(), Err(Error::Malformed(_))));
    }

    #[test]
    fn unterminated_string_is_malformed() {
        let buf = [b'a', b'b', b'c'];
        let mut reader = FrameReader::new(&buf, 0);

        assert!(matches!(reader.cstr(), Err(Error::Malformed(_))));
    }
}
