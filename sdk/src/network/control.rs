//! Control channel to the voice gateway: typed JSON messages over a websocket.

use async_channel::{unbounded, Receiver, Sender};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, error, trace, warn};
use url::Url;
use voicerelay_protocol::GatewayMessage;

use crate::error::SdkError;

/// What the session asks the channel to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    Message(GatewayMessage),
    /// Normal closure (1000) with a human-readable reason.
    Close(String),
}

/// Outbound half of a control link. Cheap to clone.
#[derive(Clone)]
pub struct ControlSender {
    tx: Sender<ControlFrame>,
}

impl ControlSender {
    /// # Errors
    /// `Disconnected` once the channel has closed.
    pub async fn send(&self, message: GatewayMessage) -> Result<(), SdkError> {
        trace!("Queueing {:?} for the gateway", message.opcode());
        self.tx
            .send(ControlFrame::Message(message))
            .await
            .map_err(|_| SdkError::Disconnected)
    }

    /// Requests a normal closure. Messages queued before it are still sent;
    /// everything after it is refused. Idempotent.
    pub fn close(&self, reason: &str) {
        if self.tx.try_send(ControlFrame::Close(reason.to_string())).is_ok() {
            debug!("Closing gateway connection: {}", reason);
        }
        self.tx.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Both halves of an open control channel.
///
/// `inbound` closes when the remote goes away; that is terminal for the session.
pub struct ControlLink {
    pub sender: ControlSender,
    pub inbound: Receiver<GatewayMessage>,
}

impl ControlLink {
    /// An in-memory link. The returned [`RemoteEnd`] plays the gateway.
    #[must_use]
    pub fn pair() -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = unbounded();
        let (in_tx, in_rx) = unbounded();

        let link = Self {
            sender: ControlSender { tx: out_tx },
            inbound: in_rx,
        };
        let remote = RemoteEnd {
            frames: out_rx,
            inbound: in_tx,
        };
        (link, remote)
    }
}

/// Gateway side of [`ControlLink::pair`].
///
/// Dropping it (or calling `disconnect`) looks like the remote hanging up.
pub struct RemoteEnd {
    frames: Receiver<ControlFrame>,
    inbound: Sender<GatewayMessage>,
}

impl RemoteEnd {
    /// Next frame the client sent, or `None` once the client side is gone.
    pub async fn recv(&self) -> Option<ControlFrame> {
        self.frames.recv().await.ok()
    }

    /// Next message the client sent, skipping heartbeats.
    /// `None` on close or disconnect.
    pub async fn next_message(&self) -> Option<GatewayMessage> {
        loop {
            match self.recv().await? {
                ControlFrame::Message(GatewayMessage::Heartbeat(_)) => {}
                ControlFrame::Message(message) => return Some(message),
                ControlFrame::Close(_) => return None,
            }
        }
    }

    /// Every frame already sent, without waiting.
    pub fn drain(&self) -> Vec<ControlFrame> {
        std::iter::from_fn(|| self.frames.try_recv().ok()).collect()
    }

    /// Delivers `message` to the client as if the gateway sent it.
    ///
    /// # Errors
    /// `Disconnected` if the client dropped its link.
    pub async fn send(&self, message: GatewayMessage) -> Result<(), SdkError> {
        self.inbound
            .send(message)
            .await
            .map_err(|_| SdkError::Disconnected)
    }

    pub fn disconnect(&self) {
        self.inbound.close();
    }
}

/// Opens control links. Swappable so sessions can run against an in-memory gateway.
#[async_trait]
pub trait GatewayConnector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<ControlLink, SdkError>;
}

/// `wss://{host}/?v={version}&encoding=json`. Legacy endpoints carry a
/// `:80` suffix that must not end up in the URL.
///
/// # Errors
/// `ConnectionFailed` if the endpoint is not a valid host.
pub fn gateway_url(endpoint: &str, version: u8) -> Result<Url, SdkError> {
    let host = endpoint.strip_suffix(":80").unwrap_or(endpoint);
    let mut url = Url::parse(&format!("wss://{host}/"))
        .map_err(|e| SdkError::ConnectionFailed(format!("invalid endpoint {endpoint:?}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("v", &version.to_string())
        .append_pair("encoding", "json");
    Ok(url)
}

/// Connects over TLS websockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl GatewayConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<ControlLink, SdkError> {
        debug!("Gateway connect to {}", url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("Gateway connected to {}", url);

        let (out_tx, out_rx) = unbounded();
        let (in_tx, in_rx) = unbounded();
        spawn_handler(ws_stream, out_rx, in_tx);

        Ok(ControlLink {
            sender: ControlSender { tx: out_tx },
            inbound: in_rx,
        })
    }
}

/// Bridges the link channels and the socket until either side closes.
fn spawn_handler<S>(ws_stream: S, out_rx: Receiver<ControlFrame>, in_tx: Sender<GatewayMessage>)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    tokio::spawn(async move {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = out_rx.recv() => {
                    let outgoing = match frame {
                        Ok(ControlFrame::Message(message)) => match message.encode() {
                            Ok(text) => Message::Text(text.into()),
                            Err(e) => {
                                error!("Failed to encode {:?}: {}", message.opcode(), e);
                                continue;
                            }
                        },
                        Ok(ControlFrame::Close(reason)) => Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: reason.into(),
                        })),
                        Err(_) => Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Session disposed.".into(),
                        })),
                    };
                    let closing = matches!(outgoing, Message::Close(_));

                    if let Err(e) = write.send(outgoing).await {
                        warn!("Gateway write error: {}", e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }

                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => match GatewayMessage::decode(&text) {
                        Ok(message) => {
                            if in_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Skipping undecodable gateway message: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(cf) => debug!("Gateway closed: code={}, reason='{}'", u16::from(cf.code), cf.reason),
                            None => debug!("Gateway closed without a reason"),
                        }
                        break;
                    }
                    Some(Ok(other)) => trace!("Ignoring gateway frame {:?}", other),
                    Some(Err(e)) => {
                        warn!("Gateway read error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }

        out_rx.close();
        in_tx.close();
        debug!("Gateway handler stopped");
    });
}
