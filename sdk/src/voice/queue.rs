use async_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::error::SdkError;
use crate::voice::audio::AudioPacket;

/// Bounded queue of frames waiting for the pacer.
///
/// Any number of producers may push; the pacer is the only consumer.
#[derive(Clone)]
pub struct FrameQueue {
    tx: Sender<AudioPacket>,
    rx: Receiver<AudioPacket>,
}

impl FrameQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Enqueue a frame, waiting while the queue is full.
    ///
    /// # Errors
    /// `QueueClosed` once the owning session has been torn down.
    pub async fn push(&self, packet: AudioPacket) -> Result<(), SdkError> {
        self.tx.send(packet).await.map_err(|_| SdkError::QueueClosed)
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    /// `QueueFull` or `QueueClosed`.
    pub fn try_push(&self, packet: AudioPacket) -> Result<(), SdkError> {
        self.tx.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => SdkError::QueueFull,
            TrySendError::Closed(_) => SdkError::QueueClosed,
        })
    }

    /// Non-blocking dequeue used by the pacer.
    pub(crate) fn try_pop(&self) -> Option<AudioPacket> {
        match self.rx.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drops every pending frame.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Refuses further pushes. Frames already queued can still be drained.
    pub fn close(&self) {
        self.tx.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
