use crate::error::ProtocolError;
use crate::io::{Reader, Writer};

/// Total size of an IP discovery datagram.
pub const DISCOVERY_PACKET_SIZE: usize = 74;

/// Value of the length field: everything after type and length.
const DISCOVERY_BODY_LEN: u16 = 70;

/// Width of the NUL-padded address field.
const ADDRESS_FIELD_LEN: usize = 64;

pub const DISCOVERY_REQUEST: u16 = 0x1;
pub const DISCOVERY_RESPONSE: u16 = 0x2;

/// Size of the datagram keepalive.
pub const KEEPALIVE_SIZE: usize = 8;

/// IP discovery datagram, used both to ask the voice server for our external
/// address and to carry its answer.
///
/// Format: `[type: u16][length: u16 = 70][ssrc: u32][address: 64 bytes, NUL-padded][port: u16]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub packet_type: u16,
    pub ssrc: u32,
    pub address: String,
    pub port: u16,
}

impl DiscoveryPacket {
    #[must_use]
    pub fn request(ssrc: u32) -> Self {
        Self {
            packet_type: DISCOVERY_REQUEST,
            ssrc,
            address: String::new(),
            port: 0,
        }
    }

    #[must_use]
    pub fn response(ssrc: u32, address: impl Into<String>, port: u16) -> Self {
        Self {
            packet_type: DISCOVERY_RESPONSE,
            ssrc,
            address: address.into(),
            port,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(DISCOVERY_PACKET_SIZE);
        w.write_u16(self.packet_type);
        w.write_u16(DISCOVERY_BODY_LEN);
        w.write_u32(self.ssrc);
        w.write_nul_padded(&self.address, ADDRESS_FIELD_LEN);
        w.write_u16(self.port);
        w.into_vec()
    }

    /// # Errors
    /// Returns error if the datagram is short or the address is not UTF-8.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(buf);
        let packet_type = r.read_u16()?;
        let _len = r.read_u16()?;
        Ok(Self {
            packet_type,
            ssrc: r.read_u32()?,
            address: r.read_nul_string(ADDRESS_FIELD_LEN)?,
            port: r.read_u16()?,
        })
    }

    /// Decode a datagram that must be a discovery response.
    ///
    /// # Errors
    /// As [`DiscoveryPacket::decode`], plus `UnexpectedPacketType` for anything
    /// that is not a response.
    pub fn decode_response(buf: &[u8]) -> Result<Self, ProtocolError> {
        let packet = Self::decode(buf)?;
        if packet.packet_type != DISCOVERY_RESPONSE {
            return Err(ProtocolError::UnexpectedPacketType {
                expected: DISCOVERY_RESPONSE,
                got: packet.packet_type,
            });
        }
        Ok(packet)
    }
}

/// Datagram keepalive: the counter as 8 little-endian bytes.
#[must_use]
pub fn encode_keepalive(counter: u64) -> [u8; KEEPALIVE_SIZE] {
    counter.to_le_bytes()
}

/// # Errors
/// Returns `PacketTooShort` if fewer than 8 bytes are given.
pub fn decode_keepalive(buf: &[u8]) -> Result<u64, ProtocolError> {
    Reader::new(buf).read_u64_le()
}
