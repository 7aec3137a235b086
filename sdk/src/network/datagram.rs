use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use voicerelay_protocol::{encode_keepalive, DiscoveryPacket, DISCOVERY_PACKET_SIZE};

use crate::error::SdkError;

/// Discovery requests sent before giving up.
const MAX_DISCOVERY_ATTEMPTS: u32 = 3;

/// UDP socket carrying encrypted audio to the voice server.
///
/// Cloning shares the socket; `close` on any clone closes all of them.
#[derive(Clone)]
pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    closed: CancellationToken,
}

impl DatagramTransport {
    /// Bind an ephemeral local port and connect it to `addr`.
    ///
    /// # Errors
    /// `ConnectionFailed` if binding or connecting fails.
    pub async fn connect(addr: &str) -> Result<Self, SdkError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| SdkError::ConnectionFailed(format!("UDP bind failed: {e}")))?;

        socket
            .connect(addr)
            .await
            .map_err(|e| SdkError::ConnectionFailed(format!("UDP connect failed: {e}")))?;

        let peer = socket.peer_addr()?;
        debug!("[UDP] Connected to {}", peer);

        Ok(Self {
            socket: Arc::new(socket),
            peer,
            closed: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Ask the server which external address our packets arrive from.
    ///
    /// Datagrams that are not a discovery response for `ssrc` are ignored.
    ///
    /// # Errors
    /// `Timeout` when no attempt gets an answer, `Disconnected` after `close`.
    pub async fn discover(&self, ssrc: u32, timeout: Duration) -> Result<(String, u16), SdkError> {
        let request = DiscoveryPacket::request(ssrc).encode();

        for attempt in 1..=MAX_DISCOVERY_ATTEMPTS {
            debug!(
                "[UDP] Sending discovery for ssrc {} (attempt {}/{})",
                ssrc, attempt, MAX_DISCOVERY_ATTEMPTS
            );
            self.send(&request).await?;

            let response = tokio::select! {
                () = self.closed.cancelled() => return Err(SdkError::Disconnected),
                result = tokio::time::timeout(timeout, self.await_discovery(ssrc)) => result,
            };

            match response {
                Ok(Ok(found)) => return Ok(found),
                Ok(Err(e)) => return Err(e),
                Err(_) => debug!("[UDP] Discovery timeout on attempt {}", attempt),
            }
        }

        Err(SdkError::Timeout(format!(
            "IP discovery failed after {MAX_DISCOVERY_ATTEMPTS} attempts"
        )))
    }

    async fn await_discovery(&self, ssrc: u32) -> Result<(String, u16), SdkError> {
        let mut buf = [0u8; DISCOVERY_PACKET_SIZE * 2];
        loop {
            let n = self.socket.recv(&mut buf).await?;
            match DiscoveryPacket::decode_response(&buf[..n]) {
                Ok(packet) if packet.ssrc == ssrc => return Ok((packet.address, packet.port)),
                Ok(packet) => trace!("[UDP] Discovery response for foreign ssrc {}", packet.ssrc),
                Err(e) => trace!("[UDP] Ignoring {} byte datagram: {}", n, e),
            }
        }
    }

    /// Send the keepalive counter every `interval` until `scope` is cancelled
    /// or the transport is closed. The first datagram goes out immediately.
    pub fn spawn_keepalive(&self, interval: Duration, scope: CancellationToken) -> JoinHandle<()> {
        let transport = self.clone();

        tokio::spawn(async move {
            let mut counter: u64 = 0;

            loop {
                if let Err(e) = transport.send(&encode_keepalive(counter)).await {
                    if matches!(e, SdkError::Disconnected) {
                        break;
                    }
                    warn!("[UDP] Keepalive send failed: {}", e);
                }
                counter = counter.wrapping_add(1);

                tokio::select! {
                    () = scope.cancelled() => break,
                    () = transport.closed.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }

            debug!("[UDP] Keepalive loop stopped after {} datagrams", counter);
        })
    }

    /// # Errors
    /// `Disconnected` after `close`, `Io` if the socket rejects the datagram.
    pub async fn send(&self, datagram: &[u8]) -> Result<(), SdkError> {
        if self.closed.is_cancelled() {
            return Err(SdkError::Disconnected);
        }
        self.socket.send(datagram).await?;
        Ok(())
    }

    /// Stops the keepalive loop and refuses further sends. Idempotent; the
    /// socket itself is released when the last clone drops.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("[UDP] Closing transport to {}", self.peer);
            self.closed.cancel();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
