use thiserror::Error;

/// Protocol encoding and decoding errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("packet too short: expected at least {expected} bytes, got {got}")]
    PacketTooShort { expected: usize, got: usize },

    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    #[error("invalid UTF-8 encoding")]
    InvalidUtf8,

    #[error("malformed message envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload does not match op {op}: {source}")]
    Decode {
        op: u8,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected packet type: expected 0x{expected:04x}, got 0x{got:04x}")]
    UnexpectedPacketType { expected: u16, got: u16 },
}
