pub mod control;
pub mod datagram;
pub mod heartbeat;

pub use control::{gateway_url, ControlFrame, ControlLink, ControlSender, GatewayConnector, RemoteEnd, WebSocketConnector};
pub use datagram::DatagramTransport;
pub use heartbeat::HeartbeatScheduler;
