//! Bounds-checked little-endian cursor used by every frame decoder

use crate::{BluetoothAddress, ClassOfDevice};

/// Frame decoding failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than the field requires
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the decoder asked for
        needed: usize,
        /// Bytes left in the frame
        available: usize,
    },
    /// Header length disagrees with the bytes actually received
    #[error("length mismatch: header says {declared}, frame carries {actual}")]
    LengthMismatch {
        /// Length announced by the header
        declared: usize,
        /// Payload bytes received
        actual: usize,
    },
    /// Not an HCI event packet
    #[error("unexpected packet type 0x{0:02X}")]
    PacketType(u8),
    /// A field holds a value outside its domain
    #[error("invalid value for {0}")]
    InvalidField(&'static str),
}

/// Little-endian reader over a borrowed frame
#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if n > available {
            return Err(DecodeError::Truncated {
                needed: n,
                available,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(i8::from_le_bytes([self.u8()?]))
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub(crate) fn address(&mut self) -> Result<BluetoothAddress, DecodeError> {
        Ok(BluetoothAddress::from_le_bytes(self.array()?))
    }

    pub(crate) fn class(&mut self) -> Result<ClassOfDevice, DecodeError> {
        Ok(ClassOfDevice::from_le_bytes(self.array()?))
    }
}

/// Decode a NUL-padded name field, keeping the leading printable run
pub(crate) fn printable_name(raw: &[u8]) -> Option<String> {
    let end = raw
        .iter()
        .position(|b| !(b.is_ascii_graphic() || *b == b' ' || *b >= 0x80))
        .unwrap_or(raw.len());
    let name = String::from_utf8_lossy(&raw[..end]).trim_end().to_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_little_endian() {
        let mut reader = Reader::new(&[0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF]);
        assert_eq!(reader.u8().unwrap(), 0x01);
        assert_eq!(reader.u16().unwrap(), 0x1234);
        assert_eq!(reader.u32().unwrap(), 0x1234_5678);
        assert_eq!(reader.i8().unwrap(), -1);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_truncated() {
        let mut reader = Reader::new(&[0x01, 0x02]);
        assert_eq!(
            reader.u32(),
            Err(DecodeError::Truncated {
                needed: 4,
                available: 2
            })
        );
        // a failed read consumes nothing
        assert_eq!(reader.u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_reader_address() {
        let mut reader = Reader::new(&[0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(
            reader.address().unwrap().format_hex().as_str(),
            "12:34:56:78:9A:BC"
        );
    }

    #[test]
    fn test_printable_name() {
        let mut raw = [0u8; 16];
        raw[..7].copy_from_slice(b"Speaker");
        assert_eq!(printable_name(&raw).as_deref(), Some("Speaker"));
        assert_eq!(printable_name(&[0u8; 8]), None);
        assert_eq!(printable_name(b"Bad\x01Name").as_deref(), Some("Bad"));
    }
}
