/// Helper for building binary payloads.
///
/// Multi-byte integers are big-endian.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes `s` into a fixed-width field, NUL-padded. Longer input is truncated
    /// so the field always ends with at least one NUL.
    pub fn write_nul_padded(&mut self, s: &str, width: usize) {
        let len = s.len().min(width.saturating_sub(1));
        self.buf.extend_from_slice(&s.as_bytes()[..len]);
        self.buf.resize(self.buf.len() + (width - len), 0);
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}
