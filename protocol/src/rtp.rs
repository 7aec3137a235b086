use crate::error::ProtocolError;
use crate::io::Reader;

/// Fixed RTP header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// Version 2, no padding, no extension, no CSRCs.
pub const VERSION_FLAGS: u8 = 0x80;

/// Dynamic payload type the remote assigns to Opus.
pub const PAYLOAD_TYPE: u8 = 0x78;

/// The plaintext header preceding every audio datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    #[must_use]
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Format: `[0x80][0x78][sequence: u16 BE][timestamp: u32 BE][ssrc: u32 BE]`
    pub fn write(&self, out: &mut [u8; HEADER_SIZE]) {
        out[0] = VERSION_FLAGS;
        out[1] = PAYLOAD_TYPE;
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.write(&mut out);
        out
    }

    /// Parse the header at the start of `buf`. Version and payload type bytes
    /// are not validated.
    ///
    /// # Errors
    /// Returns `PacketTooShort` if `buf` holds fewer than 12 bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(buf);
        r.read_u16()?;
        Ok(Self {
            sequence: r.read_u16()?,
            timestamp: r.read_u32()?,
            ssrc: r.read_u32()?,
        })
    }
}
