//! Per-guild voice session: gateway handshake, secret publication and teardown.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_channel::{unbounded, Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use voicerelay_protocol::{
    GatewayMessage, Identify, Ready, SelectProtocol, SessionDescription, Speaking, SUPPORTED_MODE,
};

use crate::clock::{Clock, MonotonicClock};
use crate::config::SessionConfig;
use crate::error::SdkError;
use crate::network::{gateway_url, ControlLink, DatagramTransport, GatewayConnector, HeartbeatScheduler};
use crate::voice::audio::SILENCE_TAIL_FRAMES;
use crate::voice::crypto::SecretBoxCodec;
use crate::voice::pacer::{Outbound, Pacer};
use crate::voice::playback::Playback;
use crate::voice::queue::FrameQueue;

const CHANGING_SERVER: &str = "Changing voice server.";
const DISPOSED: &str = "Session disposed.";

/// The external event that points a session at a voice server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceServerUpdate {
    pub guild_id: u64,
    pub user_id: u64,
    pub endpoint: String,
    pub token: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speech {
    Speaking,
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// `Identify` sent, waiting for `Ready`.
    AwaitingReady,
    /// `SelectProtocol` sent, waiting for `SessionDescription`.
    Selecting,
    /// Secret published; no audio yet on this connection.
    Secured,
    Active(Speech),
    Closing,
    Closed,
}

impl SessionState {
    #[must_use]
    pub fn is_secured(self) -> bool {
        matches!(self, Self::Secured | Self::Active(_))
    }
}

enum Command {
    Connect(VoiceServerUpdate),
}

/// Handle to one guild's voice session.
///
/// Dropping the handle disposes the session.
pub struct VoiceSession {
    guild_id: u64,
    commands: Sender<Command>,
    frames: FrameQueue,
    playback: Playback,
    state: watch::Receiver<SessionState>,
    scope: CancellationToken,
}

impl VoiceSession {
    /// Start the supervisor and pacer for `guild_id` on the current runtime.
    #[must_use]
    pub fn spawn(guild_id: u64, connector: Arc<dyn GatewayConnector>, config: SessionConfig) -> Self {
        Self::spawn_with_clock(guild_id, connector, config, Arc::new(MonotonicClock::new()))
    }

    /// Like [`spawn`](Self::spawn) with an explicit pacer clock.
    #[must_use]
    pub fn spawn_with_clock<C: Clock>(
        guild_id: u64,
        connector: Arc<dyn GatewayConnector>,
        config: SessionConfig,
        clock: Arc<C>,
    ) -> Self {
        let (commands, command_rx) = unbounded();
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let frames = FrameQueue::new(config.frame_queue_capacity.max(SILENCE_TAIL_FRAMES + 1));
        let playback = Playback::new();
        let outbound = Arc::new(ArcSwapOption::empty());
        let scope = CancellationToken::new();

        let pacer = Pacer::new(guild_id, clock, frames.clone(), playback.clone(), outbound.clone());
        tokio::spawn(pacer.run(scope.clone()));

        let supervisor = Supervisor {
            guild_id,
            connector,
            config,
            commands: command_rx,
            state: state_tx,
            frames: frames.clone(),
            playback: playback.clone(),
            outbound,
            scope: scope.clone(),
            connection: None,
            discovery: None,
            generation: 0,
        };
        tokio::spawn(supervisor.run());

        Self {
            guild_id,
            commands,
            frames,
            playback,
            state,
            scope,
        }
    }

    #[must_use]
    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// Point the session at a voice server. Reconnects if the endpoint
    /// changed; a no-op once the session is closed.
    pub fn connect(&self, update: VoiceServerUpdate) {
        if self.commands.try_send(Command::Connect(update)).is_err() {
            debug!("[guild {}] Session closed, ignoring voice server update", self.guild_id);
        }
    }

    /// Queue that feeds the pacer.
    #[must_use]
    pub fn frames(&self) -> &FrameQueue {
        &self.frames
    }

    #[must_use]
    pub fn playback(&self) -> &Playback {
        &self.playback
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// True once disposal has started; such a session ignores further updates.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.scope.is_cancelled()
            || matches!(self.state(), SessionState::Closing | SessionState::Closed)
    }

    /// Resolves once teardown has finished.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Tear the session down. Idempotent; teardown itself runs once, on the
    /// supervisor task.
    pub fn dispose(&self) {
        if !self.scope.is_cancelled() {
            debug!("[guild {}] Disposing voice session", self.guild_id);
            self.scope.cancel();
        }
        self.commands.close();
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum Stage {
    Identifying,
    /// `Ready` received; discovery runs on its own task.
    Discovering {
        ssrc: u32,
        transport: DatagramTransport,
        fallback: (String, u16),
    },
    Selecting { ssrc: u32, transport: DatagramTransport },
    Secured { ssrc: u32, transport: DatagramTransport },
}

/// One open gateway connection and the loops that belong to it.
struct Connection {
    endpoint: String,
    link: ControlLink,
    receive_scope: CancellationToken,
    data_scope: CancellationToken,
    heartbeat: HeartbeatScheduler,
    keepalive: Option<JoinHandle<()>>,
    stage: Stage,
}

struct Supervisor {
    guild_id: u64,
    connector: Arc<dyn GatewayConnector>,
    config: SessionConfig,
    commands: Receiver<Command>,
    state: watch::Sender<SessionState>,
    frames: FrameQueue,
    playback: Playback,
    outbound: Arc<ArcSwapOption<Outbound>>,
    scope: CancellationToken,
    connection: Option<Connection>,
    discovery: Option<JoinHandle<Result<(String, u16), SdkError>>>,
    generation: u64,
}

impl Supervisor {
    async fn run(mut self) {
        let mut playback = self.playback.subscribe();

        loop {
            tokio::select! {
                () = self.scope.cancelled() => break,

                command = self.commands.recv() => match command {
                    Ok(Command::Connect(update)) => self.connect(update).await,
                    Err(_) => break,
                },

                inbound = next_inbound(self.connection.as_ref()) => match inbound {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        warn!("[guild {}] Voice gateway connection closed", self.guild_id);
                        break;
                    }
                },

                discovered = discovery_outcome(&mut self.discovery) => self.select_protocol(discovered).await,

                Ok(()) = playback.changed() => self.refresh_activity(),
            }
        }

        self.teardown().await;
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("[guild {}] {:?} -> {:?}", self.guild_id, previous, next);
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Mirrors the pacer's playback into `Active` once secured.
    fn refresh_activity(&self) {
        let current = self.current_state();
        if !current.is_secured() {
            return;
        }
        let playback = self.playback.state();
        if current == SessionState::Secured && !playback.playing {
            return;
        }
        self.set_state(SessionState::Active(if playback.speaking {
            Speech::Speaking
        } else {
            Speech::Silent
        }));
    }

    async fn connect(&mut self, update: VoiceServerUpdate) {
        if let Some(connection) = &self.connection {
            if connection.endpoint == update.endpoint && !connection.link.sender.is_closed() {
                info!(
                    "[guild {}] Already connected to {}, ignoring update",
                    self.guild_id, update.endpoint
                );
                return;
            }
            info!("[guild {}] Moving to voice server {}", self.guild_id, update.endpoint);
            self.close_connection(CHANGING_SERVER).await;
        }

        self.set_state(SessionState::Connecting);

        let url = match gateway_url(&update.endpoint, self.config.gateway_version) {
            Ok(url) => url,
            Err(e) => {
                error!("[guild {}] {}", self.guild_id, e);
                self.set_state(SessionState::Disconnected);
                return;
            }
        };

        let link = tokio::select! {
            () = self.scope.cancelled() => return,
            result = self.connector.connect(&url) => match result {
                Ok(link) => link,
                Err(e) => {
                    error!("[guild {}] Failed to connect to {}: {}", self.guild_id, url, e);
                    self.set_state(SessionState::Disconnected);
                    return;
                }
            },
        };
        info!("[guild {}] Connected to voice gateway {}", self.guild_id, url);

        let identify = GatewayMessage::Identify(Identify {
            server_id: update.guild_id.to_string(),
            user_id: update.user_id.to_string(),
            session_id: update.session_id,
            token: update.token,
        });
        if let Err(e) = link.sender.send(identify).await {
            error!("[guild {}] Failed to identify: {}", self.guild_id, e);
            link.sender.close(DISPOSED);
            self.set_state(SessionState::Disconnected);
            return;
        }

        let heartbeat = HeartbeatScheduler::new(link.sender.clone());
        let receive_scope = CancellationToken::new();
        let data_scope = combined_scope(&receive_scope, &heartbeat.scope());

        self.connection = Some(Connection {
            endpoint: update.endpoint,
            link,
            receive_scope,
            data_scope,
            heartbeat,
            keepalive: None,
            stage: Stage::Identifying,
        });
        self.set_state(SessionState::AwaitingReady);
    }

    async fn handle_message(&mut self, message: GatewayMessage) {
        trace!("[guild {}] Received {:?}", self.guild_id, message.opcode());

        match message {
            GatewayMessage::Hello(hello) => {
                let Some(connection) = &self.connection else { return };
                match hello.heartbeat_interval() {
                    Some(interval) => connection.heartbeat.restart(interval).await,
                    None => warn!("[guild {}] Hello without a usable interval", self.guild_id),
                }
            }
            GatewayMessage::Ready(ready) => self.handle_ready(ready).await,
            GatewayMessage::SessionDescription(description) => {
                self.handle_session_description(description).await;
            }
            GatewayMessage::HeartbeatAck(nonce) => trace!("[guild {}] Heartbeat {} acknowledged", self.guild_id, nonce),
            GatewayMessage::Speaking(speaking) => trace!(
                "[guild {}] User {:?} speaking={}",
                self.guild_id,
                speaking.user_id,
                speaking.speaking
            ),
            GatewayMessage::ClientDisconnect(client) => {
                debug!("[guild {}] User {} left the channel", self.guild_id, client.user_id);
            }
            GatewayMessage::Resumed => debug!("[guild {}] Session resumed", self.guild_id),
            other => debug!("[guild {}] Ignoring {:?}", self.guild_id, other.opcode()),
        }
    }

    async fn handle_ready(&mut self, ready: Ready) {
        let guild_id = self.guild_id;
        let discovery_timeout = self.config.discovery_timeout;
        let Some(connection) = self.connection.as_mut() else { return };

        if !matches!(connection.stage, Stage::Identifying) {
            warn!("[guild {}] Ignoring repeated Ready", guild_id);
            return;
        }

        if let Some(interval) = ready.heartbeat_interval() {
            connection.heartbeat.restart(interval).await;
        }

        let transport = match DatagramTransport::connect(&format!("{}:{}", ready.ip, ready.port)).await {
            Ok(transport) => transport,
            Err(e) => {
                error!("[guild {}] Voice UDP setup failed: {}", guild_id, e);
                return;
            }
        };

        // Commands and gateway messages keep flowing while this runs.
        let discovering = transport.clone();
        let ssrc = ready.ssrc;
        self.discovery = Some(tokio::spawn(async move { discovering.discover(ssrc, discovery_timeout).await }));

        connection.stage = Stage::Discovering {
            ssrc,
            transport,
            fallback: (ready.ip, ready.port),
        };
    }

    async fn select_protocol(&mut self, discovered: Result<(String, u16), SdkError>) {
        let guild_id = self.guild_id;
        let Some(connection) = self.connection.as_mut() else { return };

        let (ssrc, transport, fallback) = match std::mem::replace(&mut connection.stage, Stage::Identifying) {
            Stage::Discovering {
                ssrc,
                transport,
                fallback,
            } => (ssrc, transport, fallback),
            other => {
                connection.stage = other;
                return;
            }
        };

        let (address, port) = match discovered {
            Ok(found) => {
                debug!("[guild {}] Discovered external address {}:{}", guild_id, found.0, found.1);
                found
            }
            Err(e) => {
                warn!(
                    "[guild {}] IP discovery failed ({}), selecting {}:{}",
                    guild_id, e, fallback.0, fallback.1
                );
                fallback
            }
        };

        let select = GatewayMessage::SelectProtocol(SelectProtocol::udp(address, port, SUPPORTED_MODE));
        if let Err(e) = connection.link.sender.send(select).await {
            error!("[guild {}] Failed to select protocol: {}", guild_id, e);
            transport.close();
            return;
        }

        connection.stage = Stage::Selecting { ssrc, transport };
        self.set_state(SessionState::Selecting);
    }

    async fn handle_session_description(&mut self, description: SessionDescription) {
        let guild_id = self.guild_id;
        let keepalive_interval = self.config.keepalive_interval;
        let Some(connection) = self.connection.as_mut() else { return };

        let (ssrc, transport) = match &connection.stage {
            Stage::Identifying => {
                warn!("[guild {}] SessionDescription before Ready, ignoring", guild_id);
                return;
            }
            Stage::Discovering { .. } => {
                warn!("[guild {}] SessionDescription before protocol selection, ignoring", guild_id);
                return;
            }
            Stage::Selecting { ssrc, transport } | Stage::Secured { ssrc, transport } => {
                (*ssrc, transport.clone())
            }
        };

        let codec = match secure_codec(&description) {
            Ok(codec) => codec,
            Err(e) => {
                error!(error = %e, "[guild {}] Rejecting session description, voice stays unsecured", guild_id);
                return;
            }
        };

        if let Err(e) = connection
            .link
            .sender
            .send(GatewayMessage::Speaking(Speaking::new(false)))
            .await
        {
            warn!("[guild {}] Failed to send speaking update: {}", guild_id, e);
        }

        if connection.keepalive.is_none() {
            connection.keepalive =
                Some(transport.spawn_keepalive(keepalive_interval, connection.data_scope.clone()));
        }

        self.generation += 1;
        self.outbound.store(Some(Arc::new(Outbound {
            generation: self.generation,
            ssrc,
            codec,
            transport: transport.clone(),
            control: connection.link.sender.clone(),
            data_scope: connection.data_scope.clone(),
        })));
        connection.stage = Stage::Secured { ssrc, transport };

        info!("[guild {}] Voice connection secured (ssrc {})", guild_id, ssrc);
        if !self.current_state().is_secured() {
            self.set_state(SessionState::Secured);
        }
        self.refresh_activity();
    }

    /// Withdraws the secret and stops every loop tied to the connection.
    async fn close_connection(&mut self, reason: &str) {
        self.outbound.store(None);
        if let Some(discovery) = self.discovery.take() {
            discovery.abort();
        }

        let Some(connection) = self.connection.take() else { return };
        connection.receive_scope.cancel();
        connection.heartbeat.shutdown().await;
        connection.data_scope.cancel();
        if let Some(keepalive) = connection.keepalive {
            let _ = keepalive.await;
        }
        if let Stage::Discovering { transport, .. }
        | Stage::Selecting { transport, .. }
        | Stage::Secured { transport, .. } = &connection.stage
        {
            transport.close();
        }
        connection.link.sender.close(reason);
        debug!("[guild {}] Connection to {} closed", self.guild_id, connection.endpoint);
    }

    async fn teardown(&mut self) {
        self.set_state(SessionState::Closing);
        self.scope.cancel();
        self.commands.close();
        self.close_connection(DISPOSED).await;

        self.frames.close();
        self.frames.clear();
        self.playback.reset();

        self.set_state(SessionState::Closed);
        info!("[guild {}] Voice session closed", self.guild_id);
    }
}

async fn next_inbound(connection: Option<&Connection>) -> Option<GatewayMessage> {
    match connection {
        Some(connection) => connection.link.inbound.recv().await.ok(),
        None => std::future::pending().await,
    }
}

async fn discovery_outcome(
    discovery: &mut Option<JoinHandle<Result<(String, u16), SdkError>>>,
) -> Result<(String, u16), SdkError> {
    let Some(task) = discovery.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = match task.await {
        Ok(result) => result,
        Err(e) => Err(SdkError::ConnectionFailed(format!("discovery task failed: {e}"))),
    };
    *discovery = None;
    outcome
}

/// A scope cancelled as soon as either parent is.
fn combined_scope(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
    let combined = CancellationToken::new();
    let (a, b, watcher) = (a.clone(), b.clone(), combined.clone());
    tokio::spawn(async move {
        tokio::select! {
            () = a.cancelled() => {}
            () = b.cancelled() => {}
            () = watcher.cancelled() => {}
        }
        watcher.cancel();
    });
    combined
}

/// Checks the negotiated mode and builds the codec for its key.
fn secure_codec(description: &SessionDescription) -> Result<SecretBoxCodec, SdkError> {
    if description.mode != SUPPORTED_MODE {
        return Err(SdkError::UnsupportedMode(description.mode.clone()));
    }
    SecretBoxCodec::new(&description.secret_key)
}
