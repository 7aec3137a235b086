use thiserror::Error;
use voicerelay_protocol::ProtocolError;

/// Errors surfaced by the voice relay SDK.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SdkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from voice server")]
    Disconnected,

    #[error("Timeout exceeded: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Unsupported encryption mode: {0}")]
    UnsupportedMode(String),

    #[error("Secret key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Voice session is not secured yet")]
    NotSecured,

    #[error("Packet encryption failed")]
    Encryption,

    #[error("Packet authentication failed")]
    Decryption,

    #[error("Opus codec error: {0}")]
    Codec(String),

    #[error("Frame duration must be a positive multiple of 20ms, got {0}ms")]
    InvalidFrameDuration(u32),

    #[error("Frame queue is closed")]
    QueueClosed,

    #[error("Frame queue is full")]
    QueueFull,
}

impl From<tokio_tungstenite::tungstenite::Error> for SdkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SdkError::WebSocket(e.to_string())
    }
}

impl From<opus::Error> for SdkError {
    fn from(e: opus::Error) -> Self {
        SdkError::Codec(e.to_string())
    }
}
