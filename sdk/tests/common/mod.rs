#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{unbounded, Receiver, Sender};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use url::Url;
use voicerelay_protocol::{
    DiscoveryPacket, GatewayMessage, Ready, SessionDescription, DISCOVERY_PACKET_SIZE, SUPPORTED_MODE,
};
use voicerelay_sdk::{
    ControlFrame, ControlLink, GatewayConnector, RemoteEnd, SdkError, SessionConfig, SessionState,
    VoiceServerUpdate, VoiceSession,
};

pub const SSRC: u32 = 1234;
pub const SECRET: [u8; 32] = [0u8; 32];

/// Fails the test instead of hanging it.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Hands every opened link's gateway end to the test.
pub struct FakeConnector {
    remotes: Sender<(Url, RemoteEnd)>,
}

#[async_trait]
impl GatewayConnector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<ControlLink, SdkError> {
        let (link, remote) = ControlLink::pair();
        self.remotes
            .send((url.clone(), remote))
            .await
            .map_err(|_| SdkError::ConnectionFailed("test gateway gone".to_string()))?;
        Ok(link)
    }
}

pub fn fake_gateway() -> (Arc<FakeConnector>, Receiver<(Url, RemoteEnd)>) {
    let (remotes, rx) = unbounded();
    (Arc::new(FakeConnector { remotes }), rx)
}

/// Refuses every connection attempt.
pub struct UnreachableConnector;

#[async_trait]
impl GatewayConnector for UnreachableConnector {
    async fn connect(&self, _url: &Url) -> Result<ControlLink, SdkError> {
        Err(SdkError::ConnectionFailed("unreachable".to_string()))
    }
}

/// Voice UDP endpoint on loopback. Answers discovery with a fixed external
/// address when one is configured and forwards every other datagram.
pub struct FakeVoiceServer {
    pub addr: SocketAddr,
    pub discoveries: Receiver<u32>,
    pub datagrams: Receiver<Vec<u8>>,
}

impl FakeVoiceServer {
    pub async fn start(external: Option<(&str, u16)>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = socket.local_addr().expect("local addr");
        let external = external.map(|(ip, port)| (ip.to_string(), port));
        let (discovery_tx, discoveries) = unbounded();
        let (datagram_tx, datagrams) = unbounded();

        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let datagram = &buf[..n];
                if n == DISCOVERY_PACKET_SIZE {
                    if let Ok(request) = DiscoveryPacket::decode(datagram) {
                        let _ = discovery_tx.send(request.ssrc).await;
                        if let Some((ip, port)) = &external {
                            let reply = DiscoveryPacket::response(request.ssrc, ip.clone(), *port);
                            let _ = socket.send_to(&reply.encode(), from).await;
                        }
                        continue;
                    }
                }
                let _ = datagram_tx.send(datagram.to_vec()).await;
            }
        });

        Self {
            addr,
            discoveries,
            datagrams,
        }
    }

    /// Next datagram that is neither discovery nor keepalive.
    pub async fn next_audio(&self) -> Vec<u8> {
        loop {
            let datagram = within(self.datagrams.recv()).await.expect("server stopped");
            if datagram.len() > voicerelay_protocol::KEEPALIVE_SIZE {
                return datagram;
            }
        }
    }
}

pub fn update(endpoint: &str) -> VoiceServerUpdate {
    VoiceServerUpdate {
        guild_id: 1,
        user_id: 42,
        endpoint: endpoint.to_string(),
        token: "t".to_string(),
        session_id: "s".to_string(),
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        discovery_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

pub fn ready(server: &FakeVoiceServer) -> GatewayMessage {
    GatewayMessage::Ready(Ready {
        ssrc: SSRC,
        ip: server.addr.ip().to_string(),
        port: server.addr.port(),
        modes: vec![SUPPORTED_MODE.to_string()],
        heartbeat_interval: Some(5000.0),
    })
}

pub fn session_description(mode: &str) -> GatewayMessage {
    GatewayMessage::SessionDescription(SessionDescription {
        mode: mode.to_string(),
        secret_key: SECRET.to_vec(),
    })
}

pub async fn wait_for_state(session: &VoiceSession, wanted: fn(SessionState) -> bool) {
    let mut state = session.watch_state();
    within(state.wait_for(|s| wanted(*s)))
        .await
        .expect("session dropped");
}

/// Next non-heartbeat frame, close frames included.
pub async fn next_frame(remote: &RemoteEnd) -> ControlFrame {
    loop {
        match within(remote.recv()).await.expect("link closed") {
            ControlFrame::Message(GatewayMessage::Heartbeat(_)) => {}
            frame => return frame,
        }
    }
}

/// Runs the full handshake against a discovery-answering server.
pub async fn secured_session(
    gateway: &Receiver<(Url, RemoteEnd)>,
    session: &VoiceSession,
) -> (RemoteEnd, FakeVoiceServer) {
    let server = FakeVoiceServer::start(Some(("1.2.3.4", 5000))).await;
    session.connect(update("x.example"));

    let (_, remote) = within(gateway.recv()).await.expect("no connection");
    within(remote.next_message()).await.expect("identify");
    remote.send(ready(&server)).await.expect("send ready");
    within(remote.next_message()).await.expect("select protocol");
    remote
        .send(session_description(SUPPORTED_MODE))
        .await
        .expect("send session description");
    within(remote.next_message()).await.expect("speaking");
    wait_for_state(session, SessionState::is_secured).await;

    (remote, server)
}
