use crate::error::ProtocolError;

macro_rules! opcodes {
    ($($name:ident = $val:expr),* $(,)?) => {
        /// Control-channel operation codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum VoiceOpcode { $($name = $val,)* }

        impl VoiceOpcode {
            #[must_use]
            pub const fn as_u8(self) -> u8 { self as u8 }
        }

        impl TryFrom<u8> for VoiceOpcode {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($val => Ok(Self::$name),)*
                    _ => Err(ProtocolError::UnknownOpcode(value)),
                }
            }
        }
    };
}

opcodes! {
    // Client -> server
    Identify = 0,
    SelectProtocol = 1,
    Heartbeat = 3,
    Speaking = 5,

    // Server -> client
    Ready = 2,
    SessionDescription = 4,
    HeartbeatAck = 6,
    Hello = 8,
    Resumed = 9,
    ClientDisconnect = 13,
}
