//! Voice relay client core.
//!
//! A [`VoiceSession`] negotiates a secured UDP voice connection with the
//! gateway and streams queued audio frames over it at real-time cadence.

pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod session;
pub mod voice;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::SessionConfig;
pub use error::SdkError;
pub use network::{ControlFrame, ControlLink, GatewayConnector, RemoteEnd, WebSocketConnector};
pub use registry::SessionRegistry;
pub use session::{SessionState, Speech, VoiceServerUpdate, VoiceSession};
pub use voice::audio::{AudioPacket, AudioPayload};
pub use voice::playback::{Playback, PlaybackState};
pub use voice::queue::FrameQueue;
