use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::opcode::VoiceOpcode;

/// The only authenticated-encryption mode this client negotiates.
pub const SUPPORTED_MODE: &str = "xsalsa20_poly1305";

/// Transport protocol announced in `SelectProtocol`.
pub const UDP_PROTOCOL: &str = "udp";

/// Opens a voice session. Snowflake ids travel as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

impl SelectProtocol {
    /// Builds a UDP selection advertising our external address.
    #[must_use]
    pub fn udp(address: impl Into<String>, port: u16, mode: impl Into<String>) -> Self {
        Self {
            protocol: UDP_PROTOCOL.to_string(),
            data: SelectProtocolData {
                address: address.into(),
                port,
                mode: mode.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<f64>,
}

impl Ready {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval.and_then(millis_to_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: f64,
}

impl Hello {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        millis_to_duration(self.heartbeat_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaking {
    #[serde(deserialize_with = "bool_or_flags")]
    pub speaking: bool,
    #[serde(default)]
    pub delay: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Speaking {
    /// Outbound speaking update; delay is always zero for this client.
    #[must_use]
    pub fn new(speaking: bool) -> Self {
        Self {
            speaking,
            delay: 0,
            ssrc: None,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDisconnect {
    pub user_id: String,
}

/// A control-channel message, tagged by its opcode.
///
/// On the wire every message is the envelope `{"op": <u8>, "d": <payload>}`.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum GatewayMessage {
    Identify(Identify),
    SelectProtocol(SelectProtocol),
    Ready(Ready),
    /// Nonce is the sender's unix time in seconds.
    Heartbeat(u64),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    HeartbeatAck(u64),
    Hello(Hello),
    Resumed,
    ClientDisconnect(ClientDisconnect),
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    op: u8,
    #[serde(default)]
    d: Value,
}

impl GatewayMessage {
    #[must_use]
    pub fn opcode(&self) -> VoiceOpcode {
        match self {
            Self::Identify(_) => VoiceOpcode::Identify,
            Self::SelectProtocol(_) => VoiceOpcode::SelectProtocol,
            Self::Ready(_) => VoiceOpcode::Ready,
            Self::Heartbeat(_) => VoiceOpcode::Heartbeat,
            Self::SessionDescription(_) => VoiceOpcode::SessionDescription,
            Self::Speaking(_) => VoiceOpcode::Speaking,
            Self::HeartbeatAck(_) => VoiceOpcode::HeartbeatAck,
            Self::Hello(_) => VoiceOpcode::Hello,
            Self::Resumed => VoiceOpcode::Resumed,
            Self::ClientDisconnect(_) => VoiceOpcode::ClientDisconnect,
        }
    }

    /// Encode to the JSON text frame sent on the control channel.
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let op = self.opcode().as_u8();
        match self {
            Self::Identify(p) => envelope(op, p),
            Self::SelectProtocol(p) => envelope(op, p),
            Self::Ready(p) => envelope(op, p),
            Self::Heartbeat(nonce) | Self::HeartbeatAck(nonce) => envelope(op, nonce),
            Self::SessionDescription(p) => envelope(op, p),
            Self::Speaking(p) => envelope(op, p),
            Self::Hello(p) => envelope(op, p),
            Self::Resumed => envelope(op, &Value::Null),
            Self::ClientDisconnect(p) => envelope(op, p),
        }
    }

    /// Decode a JSON text frame.
    ///
    /// The payload is only ever read as the shape registered for its op.
    ///
    /// # Errors
    /// `Json` for a malformed envelope, `UnknownOpcode` for unregistered ops and
    /// `Decode` when `d` does not fit the op's payload.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let EnvelopeIn { op, d } = serde_json::from_str(text)?;

        Ok(match VoiceOpcode::try_from(op)? {
            VoiceOpcode::Identify => Self::Identify(payload(op, d)?),
            VoiceOpcode::SelectProtocol => Self::SelectProtocol(payload(op, d)?),
            VoiceOpcode::Ready => Self::Ready(payload(op, d)?),
            VoiceOpcode::Heartbeat => Self::Heartbeat(payload(op, d)?),
            VoiceOpcode::SessionDescription => Self::SessionDescription(payload(op, d)?),
            VoiceOpcode::Speaking => Self::Speaking(payload(op, d)?),
            VoiceOpcode::HeartbeatAck => Self::HeartbeatAck(payload(op, d)?),
            VoiceOpcode::Hello => Self::Hello(payload(op, d)?),
            VoiceOpcode::Resumed => Self::Resumed,
            VoiceOpcode::ClientDisconnect => Self::ClientDisconnect(payload(op, d)?),
        })
    }
}

fn envelope<T: Serialize>(op: u8, d: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&EnvelopeOut { op, d })?)
}

fn payload<T: DeserializeOwned>(op: u8, d: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(d).map_err(|source| ProtocolError::Decode { op, source })
}

fn millis_to_duration(ms: f64) -> Option<Duration> {
    (ms.is_finite() && ms > 0.0).then(|| Duration::from_secs_f64(ms / 1000.0))
}

/// Remote speaking updates carry a bit field, ours carry a bool.
fn bool_or_flags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Bits(u64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Bits(bits) => bits != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(message: &GatewayMessage) -> Value {
        serde_json::from_str(&message.encode().expect("encode failed")).expect("valid json")
    }

    #[test]
    fn identify_uses_string_ids() {
        let message = GatewayMessage::Identify(Identify {
            server_id: "1".to_string(),
            user_id: "42".to_string(),
            session_id: "s".to_string(),
            token: "t".to_string(),
        });

        assert_eq!(
            as_json(&message),
            json!({"op": 0, "d": {"server_id": "1", "user_id": "42", "session_id": "s", "token": "t"}})
        );
    }

    #[test]
    fn select_protocol_nests_udp_data() {
        let message = GatewayMessage::SelectProtocol(SelectProtocol::udp("1.2.3.4", 5000, SUPPORTED_MODE));

        assert_eq!(
            as_json(&message),
            json!({"op": 1, "d": {"protocol": "udp", "data": {"address": "1.2.3.4", "port": 5000, "mode": "xsalsa20_poly1305"}}})
        );
    }

    #[test]
    fn heartbeat_payload_is_bare_integer() {
        assert_eq!(as_json(&GatewayMessage::Heartbeat(1_700_000_000)), json!({"op": 3, "d": 1_700_000_000u64}));
    }

    #[test]
    fn speaking_omits_remote_only_fields() {
        assert_eq!(
            as_json(&GatewayMessage::Speaking(Speaking::new(false))),
            json!({"op": 5, "d": {"speaking": false, "delay": 0}})
        );
    }

    #[test]
    fn decodes_ready() {
        let text = r#"{"op":2,"d":{"ssrc":1234,"ip":"1.2.3.4","port":5000,"modes":["xsalsa20_poly1305"],"heartbeat_interval":5000}}"#;

        match GatewayMessage::decode(text).expect("decode failed") {
            GatewayMessage::Ready(ready) => {
                assert_eq!(ready.ssrc, 1234);
                assert_eq!(ready.ip, "1.2.3.4");
                assert_eq!(ready.port, 5000);
                assert_eq!(ready.heartbeat_interval(), Some(Duration::from_secs(5)));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decodes_float_hello_interval() {
        let message = GatewayMessage::decode(r#"{"op":8,"d":{"heartbeat_interval":41250.0}}"#).unwrap();
        let GatewayMessage::Hello(hello) = message else {
            panic!("expected hello");
        };
        assert_eq!(hello.heartbeat_interval(), Some(Duration::from_millis(41_250)));
    }

    #[test]
    fn non_positive_interval_is_ignored() {
        let hello = Hello { heartbeat_interval: 0.0 };
        assert_eq!(hello.heartbeat_interval(), None);
    }

    #[test]
    fn decodes_session_description_key() {
        let text = json!({"op": 4, "d": {"mode": "xsalsa20_poly1305", "secret_key": vec![7u8; 32]}}).to_string();

        let GatewayMessage::SessionDescription(sd) = GatewayMessage::decode(&text).unwrap() else {
            panic!("expected session description");
        };
        assert_eq!(sd.mode, SUPPORTED_MODE);
        assert_eq!(sd.secret_key, vec![7u8; 32]);
    }

    #[test]
    fn remote_speaking_flags_decode_as_bool() {
        let text = r#"{"op":5,"d":{"speaking":1,"ssrc":99,"user_id":"7"}}"#;
        let GatewayMessage::Speaking(speaking) = GatewayMessage::decode(text).unwrap() else {
            panic!("expected speaking");
        };
        assert!(speaking.speaking);
        assert_eq!(speaking.ssrc, Some(99));
    }

    #[test]
    fn payload_of_wrong_shape_is_a_decode_error() {
        // A Hello body under the Ready opcode.
        let text = r#"{"op":2,"d":{"heartbeat_interval":5000}}"#;
        assert!(matches!(
            GatewayMessage::decode(text),
            Err(ProtocolError::Decode { op: 2, .. })
        ));
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(matches!(
            GatewayMessage::decode(r#"{"op":42,"d":null}"#),
            Err(ProtocolError::UnknownOpcode(42))
        ));
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(GatewayMessage::decode("not json"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn resumed_ignores_payload() {
        assert_eq!(GatewayMessage::decode(r#"{"op":9,"d":null}"#).unwrap(), GatewayMessage::Resumed);
        assert_eq!(GatewayMessage::decode(r#"{"op":9}"#).unwrap(), GatewayMessage::Resumed);
    }
}
