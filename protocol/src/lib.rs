//! Wire formats spoken by the voice relay: JSON control messages on the
//! gateway socket and binary datagrams on the voice UDP socket.

pub mod discovery;
pub mod error;
pub mod gateway;
pub mod io;
pub mod opcode;
pub mod rtp;

pub use discovery::{decode_keepalive, encode_keepalive, DiscoveryPacket, DISCOVERY_PACKET_SIZE, KEEPALIVE_SIZE};
pub use error::ProtocolError;
pub use gateway::{
    ClientDisconnect, GatewayMessage, Hello, Identify, Ready, SelectProtocol, SelectProtocolData,
    SessionDescription, Speaking, SUPPORTED_MODE,
};
pub use opcode::VoiceOpcode;
pub use rtp::{RtpHeader, HEADER_SIZE as RTP_HEADER_SIZE};
