use crate::error::ProtocolError;

/// Helper for reading binary data with automatic cursor advancement.
///
/// Multi-byte integers are big-endian unless the method name says otherwise.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline]
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Borrows the next `len` bytes and advances past them.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(ProtocolError::PacketTooShort {
                expected: self.pos + len,
                got: self.data.len(),
            })?;
        self.pos += len;
        Ok(bytes)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[inline]
    pub fn read_u64_le(&mut self) -> Result<u64, ProtocolError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Reads a fixed-width field holding a NUL-terminated ASCII string.
    pub fn read_nul_string(&mut self, width: usize) -> Result<String, ProtocolError> {
        let field = self.read_bytes(width)?;
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        std::str::from_utf8(&field[..end])
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_fields_in_order() {
        let data = [0x12, 0x34, 0xde, 0xad, 0xbe, 0xef, 0xff];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.position(), 6);
        assert!(r.read_u16().is_err());
    }

    #[test]
    fn keepalive_counter_is_little_endian() {
        let mut r = Reader::new(&[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(r.read_u64_le().unwrap(), 1);
        assert_eq!(r.position(), 8);
    }

    #[test]
    fn short_buffer_reports_expected_length() {
        let mut r = Reader::new(&[0x01]);
        match r.read_u32() {
            Err(ProtocolError::PacketTooShort { expected, got }) => {
                assert_eq!(expected, 4);
                assert_eq!(got, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn nul_string_stops_at_terminator() {
        let mut field = [0u8; 8];
        field[..3].copy_from_slice(b"abc");
        let mut r = Reader::new(&field);
        assert_eq!(r.read_nul_string(8).unwrap(), "abc");
        assert_eq!(r.position(), 8);
    }
}
