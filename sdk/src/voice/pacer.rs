//! Real-time send loop: one datagram per frame interval, drift-corrected.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use voicerelay_protocol::{GatewayMessage, Speaking};

use crate::clock::Clock;
use crate::error::SdkError;
use crate::network::{ControlSender, DatagramTransport};
use crate::voice::audio::{AudioPacket, AudioPayload, SILENCE_TAIL_FRAMES};
use crate::voice::crypto::SecretBoxCodec;
use crate::voice::encoder::OpusCodec;
use crate::voice::framer::RtpFramer;
use crate::voice::playback::Playback;
use crate::voice::queue::FrameQueue;

/// Scheduling quantum; frame durations are whole multiples of it.
pub const RESOLUTION: Duration = Duration::from_millis(5);

/// Quanta waited per idle iteration, i.e. a nominal 20ms tick.
pub const IDLE_MODIFIER: u32 = 4;

/// Everything the pacer needs to put a frame on the wire, published once the
/// handshake is secured and withdrawn on teardown or endpoint change.
pub struct Outbound {
    /// Bumped for every secured handshake; speaking state is tracked per generation.
    pub generation: u64,
    pub ssrc: u32,
    pub codec: SecretBoxCodec,
    pub transport: DatagramTransport,
    pub control: ControlSender,
    /// Cancelled when the control path dies; no datagrams after that.
    pub data_scope: CancellationToken,
}

/// Result of one pacer iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Queue was empty.
    Idle,
    /// A frame went out.
    Sent,
    /// A frame was dequeued but could not be sent.
    Skipped,
}

/// Drains the frame queue at real-time cadence.
///
/// The pacer is the only writer of the RTP counters and the only sender of
/// audio datagrams, so none of its state needs locking.
pub struct Pacer<C: Clock> {
    guild_id: u64,
    clock: Arc<C>,
    queue: FrameQueue,
    playback: Playback,
    outbound: Arc<ArcSwapOption<Outbound>>,
    framer: RtpFramer,
    opus: Option<OpusCodec>,
    opus_buf: Vec<u8>,
    packet_buf: Vec<u8>,
    next_tick: Duration,
    speaking_generation: Option<u64>,
}

impl<C: Clock> Pacer<C> {
    #[must_use]
    pub fn new(
        guild_id: u64,
        clock: Arc<C>,
        queue: FrameQueue,
        playback: Playback,
        outbound: Arc<ArcSwapOption<Outbound>>,
    ) -> Self {
        let next_tick = clock.now();
        Self {
            guild_id,
            clock,
            queue,
            playback,
            outbound,
            framer: RtpFramer::new(),
            opus: None,
            opus_buf: Vec::new(),
            packet_buf: Vec::new(),
            next_tick,
            speaking_generation: None,
        }
    }

    #[must_use]
    pub fn framer(&self) -> &RtpFramer {
        &self.framer
    }

    /// Tick until `scope` is cancelled, then reset the playback signal.
    pub async fn run(mut self, scope: CancellationToken) {
        debug!("[guild {}] Pacer started", self.guild_id);
        loop {
            tokio::select! {
                biased;
                () = scope.cancelled() => break,
                _ = self.tick() => {}
            }
        }
        self.playback.reset();
        debug!(
            "[guild {}] Pacer stopped at sequence {}",
            self.guild_id,
            self.framer.sequence()
        );
    }

    /// One iteration: dequeue, wait out the schedule, send, handle the tail.
    pub async fn tick(&mut self) -> Tick {
        let packet = self.queue.try_pop();

        let modifier = packet
            .as_ref()
            .map_or(IDLE_MODIFIER, |p| p.duration_ms() / 5);
        let step = RESOLUTION * modifier;

        let elapsed = self.clock.now().saturating_sub(self.next_tick);
        if elapsed < step {
            self.clock.sleep(step - elapsed).await;
        }
        // Advancing by the ideal step, not the observed one, is the drift correction.
        self.next_tick += step;

        let Some(packet) = packet else {
            return Tick::Idle;
        };

        self.playback.start_run();
        let outcome = match self.send(&packet).await {
            Ok(()) => Tick::Sent,
            Err(e) => {
                warn!("[guild {}] Skipping frame: {}", self.guild_id, e);
                Tick::Skipped
            }
        };

        self.handle_tail(&packet).await;
        outcome
    }

    async fn send(&mut self, packet: &AudioPacket) -> Result<(), SdkError> {
        let Some(outbound) = self.outbound.load_full() else {
            return Err(SdkError::NotSecured);
        };
        if outbound.data_scope.is_cancelled() {
            return Err(SdkError::Disconnected);
        }

        if self.speaking_generation != Some(outbound.generation) {
            announce(self.guild_id, &self.playback, &outbound, true).await;
            self.speaking_generation = Some(outbound.generation);
        }

        let payload = match packet.payload() {
            AudioPayload::Opus(bytes) => bytes.as_slice(),
            AudioPayload::Pcm(samples) => {
                if self.opus.is_none() {
                    self.opus = Some(OpusCodec::new()?);
                }
                let Some(opus) = self.opus.as_mut() else {
                    return Err(SdkError::Codec("encoder unavailable".to_string()));
                };
                opus.encode(samples, &mut self.opus_buf)?;
                self.opus_buf.as_slice()
            }
        };

        // Counters only move once the datagram is actually out.
        let mut framer = self.framer;
        let header = framer.advance(outbound.ssrc, packet.sample_count());
        outbound.codec.seal(&header, payload, &mut self.packet_buf)?;
        outbound.transport.send(&self.packet_buf).await?;
        self.framer = framer;

        trace!(
            "[guild {}] Sent frame seq={} ts={} ({} bytes)",
            self.guild_id,
            header.sequence,
            header.timestamp,
            self.packet_buf.len()
        );
        Ok(())
    }

    async fn handle_tail(&mut self, sent: &AudioPacket) {
        if !self.queue.is_empty() {
            return;
        }

        if !sent.is_silence() {
            for _ in 0..SILENCE_TAIL_FRAMES {
                if let Err(e) = self.queue.try_push(AudioPacket::silence()) {
                    warn!("[guild {}] Could not queue silence frame: {}", self.guild_id, e);
                    break;
                }
            }
            return;
        }

        if self.speaking_generation.take().is_some() {
            match self.outbound.load_full() {
                Some(outbound) => announce(self.guild_id, &self.playback, &outbound, false).await,
                None => self.playback.set_speaking(false),
            }
        }
        self.playback.finish_run();
        debug!("[guild {}] Playback run completed", self.guild_id);
    }
}

async fn announce(guild_id: u64, playback: &Playback, outbound: &Outbound, speaking: bool) {
    if let Err(e) = outbound
        .control
        .send(GatewayMessage::Speaking(Speaking::new(speaking)))
        .await
    {
        warn!("[guild {}] Failed to send speaking={}: {}", guild_id, speaking, e);
    }
    playback.set_speaking(speaking);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::network::{ControlFrame, ControlLink, RemoteEnd};
    use crate::voice::audio::SILENCE_FRAME;
    use tokio::net::UdpSocket;

    struct Harness {
        pacer: Pacer<ManualClock>,
        clock: Arc<ManualClock>,
        queue: FrameQueue,
        playback: Playback,
        outbound: Arc<ArcSwapOption<Outbound>>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new());
        let queue = FrameQueue::new(32);
        let playback = Playback::new();
        let outbound = Arc::new(ArcSwapOption::empty());
        let pacer = Pacer::new(1, clock.clone(), queue.clone(), playback.clone(), outbound.clone());
        Harness {
            pacer,
            clock,
            queue,
            playback,
            outbound,
        }
    }

    async fn secure(h: &Harness, generation: u64) -> (UdpSocket, RemoteEnd, SecretBoxCodec) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = DatagramTransport::connect(&server.local_addr().unwrap().to_string())
            .await
            .unwrap();
        let (link, remote) = ControlLink::pair();
        let codec = SecretBoxCodec::new(&[0u8; 32]).unwrap();
        h.outbound.store(Some(Arc::new(Outbound {
            generation,
            ssrc: 1234,
            codec: codec.clone(),
            transport,
            control: link.sender,
            data_scope: CancellationToken::new(),
        })));
        (server, remote, codec)
    }

    fn frame() -> AudioPacket {
        AudioPacket::opus(vec![0xAA; 10], 20).unwrap()
    }

    #[tokio::test]
    async fn idle_ticks_keep_twenty_ms_cadence() {
        let mut h = harness();
        for _ in 0..3 {
            assert_eq!(h.pacer.tick().await, Tick::Idle);
        }
        assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(20); 3]);
    }

    #[tokio::test]
    async fn late_wakeups_are_caught_up() {
        let mut h = harness();
        h.pacer.tick().await;

        // 15ms lost elsewhere: only 5ms left to wait.
        h.clock.advance(Duration::from_millis(15));
        h.pacer.tick().await;
        // 45ms late: no sleep at all, and the schedule still moves by 20ms.
        h.clock.advance(Duration::from_millis(45));
        h.pacer.tick().await;

        assert_eq!(
            h.clock.sleeps(),
            vec![Duration::from_millis(20), Duration::from_millis(5)]
        );
        assert_eq!(h.pacer.next_tick, Duration::from_millis(60));
    }

    #[tokio::test]
    async fn long_frames_wait_their_full_duration() {
        let mut h = harness();
        let (_server, _remote, _codec) = secure(&h, 1).await;
        h.queue.try_push(AudioPacket::opus(vec![1], 60).unwrap()).unwrap();

        h.pacer.tick().await;
        assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(60)]);
        assert_eq!(h.pacer.framer().timestamp(), 2880);
    }

    #[tokio::test]
    async fn unsecured_frames_are_skipped_without_counting() {
        let mut h = harness();
        h.queue.try_push(frame()).unwrap();

        assert_eq!(h.pacer.tick().await, Tick::Skipped);
        assert_eq!(h.pacer.framer().sequence(), 0);
        assert_eq!(h.pacer.framer().timestamp(), 0);
    }

    #[tokio::test]
    async fn burst_ends_with_three_silence_frames() {
        let mut h = harness();
        let (server, remote, codec) = secure(&h, 1).await;
        h.queue.try_push(frame()).unwrap();
        h.queue.try_push(frame()).unwrap();

        let mut ticks = Vec::new();
        for _ in 0..5 {
            ticks.push(h.pacer.tick().await);
        }
        assert_eq!(ticks, vec![Tick::Sent; 5]);
        assert_eq!(h.pacer.tick().await, Tick::Idle);

        let mut buf = [0u8; 256];
        let mut payloads = Vec::new();
        for seq in 0..5u16 {
            let n = server.recv(&mut buf).await.unwrap();
            let (header, payload) = codec.open(&buf[..n]).unwrap();
            assert_eq!(header.sequence, seq);
            assert_eq!(header.timestamp, u32::from(seq) * 960);
            assert_eq!(header.ssrc, 1234);
            payloads.push(payload);
        }
        assert_eq!(&payloads[2..], &[SILENCE_FRAME.to_vec(), SILENCE_FRAME.to_vec(), SILENCE_FRAME.to_vec()]);

        assert_eq!(
            remote.drain(),
            vec![
                ControlFrame::Message(GatewayMessage::Speaking(Speaking::new(true))),
                ControlFrame::Message(GatewayMessage::Speaking(Speaking::new(false))),
            ]
        );

        let state = h.playback.state();
        assert!(!state.playing && !state.speaking);
        assert_eq!((state.runs_started, state.runs_completed), (1, 1));
    }

    #[tokio::test]
    async fn new_generation_announces_speaking_again() {
        let mut h = harness();
        let (_s1, first, _) = secure(&h, 1).await;
        h.queue.try_push(frame()).unwrap();
        h.queue.try_push(frame()).unwrap();
        h.pacer.tick().await;

        let (_s2, second, _) = secure(&h, 2).await;
        h.pacer.tick().await;

        assert_eq!(first.drain().len(), 1);
        assert_eq!(
            second.drain(),
            vec![ControlFrame::Message(GatewayMessage::Speaking(Speaking::new(true)))]
        );
        // Counters continue across the handover.
        assert_eq!(h.pacer.framer().sequence(), 2);
    }

    #[tokio::test]
    async fn cancelled_data_scope_stops_sends() {
        let mut h = harness();
        let (_server, _remote, _codec) = secure(&h, 1).await;
        if let Some(outbound) = h.outbound.load_full() {
            outbound.data_scope.cancel();
        }
        h.queue.try_push(frame()).unwrap();

        assert_eq!(h.pacer.tick().await, Tick::Skipped);
        // Tail bookkeeping still runs.
        assert_eq!(h.queue.len(), SILENCE_TAIL_FRAMES);
    }

    #[tokio::test]
    async fn pcm_frames_are_encoded() {
        let mut h = harness();
        let (server, _remote, codec) = secure(&h, 1).await;
        h.queue
            .try_push(AudioPacket::pcm(vec![0; crate::voice::audio::pcm_len(20)]).unwrap())
            .unwrap();

        assert_eq!(h.pacer.tick().await, Tick::Sent);
        let mut buf = [0u8; 4096];
        let n = server.recv(&mut buf).await.unwrap();
        let (_, opus) = codec.open(&buf[..n]).unwrap();
        assert!(!opus.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let h = harness();
        let scope = CancellationToken::new();
        let task = tokio::spawn(h.pacer.run(scope.clone()));
        tokio::task::yield_now().await;
        scope.cancel();
        task.await.unwrap();
        assert!(!h.playback.is_playing());
    }
}
