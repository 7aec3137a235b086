use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use voicerelay_protocol::GatewayMessage;

use crate::error::SdkError;
use crate::network::control::ControlSender;

struct Running {
    scope: CancellationToken,
    handle: JoinHandle<()>,
}

/// Sends `Heartbeat` on the control channel at the interval the gateway asks for.
///
/// At most one loop is alive at a time: `restart` retires the previous loop
/// completely before spawning the next one.
pub struct HeartbeatScheduler {
    sender: ControlSender,
    root: CancellationToken,
    current: Mutex<Option<Running>>,
    interval_ms: AtomicU64,
    live: Arc<AtomicUsize>,
}

impl HeartbeatScheduler {
    #[must_use]
    pub fn new(sender: ControlSender) -> Self {
        Self {
            sender,
            root: CancellationToken::new(),
            current: Mutex::new(None),
            interval_ms: AtomicU64::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Cancelled on `shutdown`, or when a loop finds the control channel gone.
    /// Restarts never cancel it.
    #[must_use]
    pub fn scope(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Interval of the most recent `restart`.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match self.interval_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Number of heartbeat loops currently alive; never more than one.
    #[must_use]
    pub fn live_loops(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.live_loops() > 0
    }

    /// Replace the running loop with one at `interval`. No-op after `shutdown`.
    pub async fn restart(&self, interval: Duration) {
        let mut current = self.current.lock().await;
        if self.root.is_cancelled() {
            debug!("Heartbeat already shut down, ignoring restart");
            return;
        }

        if let Some(previous) = current.take() {
            previous.scope.cancel();
            let _ = previous.handle.await;
        }

        let interval = interval.max(Duration::from_millis(1));
        let scope = self.root.child_token();
        self.interval_ms.store(
            u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            Ordering::Release,
        );
        self.live.fetch_add(1, Ordering::AcqRel);

        debug!("Starting heartbeat every {:?}", interval);
        let handle = tokio::spawn(run(
            self.sender.clone(),
            interval,
            scope.clone(),
            self.root.clone(),
            LiveGuard(self.live.clone()),
        ));
        *current = Some(Running { scope, handle });
    }

    /// Stop for good. Idempotent.
    pub async fn shutdown(&self) {
        let mut current = self.current.lock().await;
        self.root.cancel();
        if let Some(previous) = current.take() {
            previous.scope.cancel();
            let _ = previous.handle.await;
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn run(
    sender: ControlSender,
    interval: Duration,
    scope: CancellationToken,
    root: CancellationToken,
    _live: LiveGuard,
) {
    while !scope.is_cancelled() {
        let nonce = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        match sender.send(GatewayMessage::Heartbeat(nonce)).await {
            Ok(()) => trace!("Heartbeat {} sent", nonce),
            Err(SdkError::Disconnected) => {
                debug!("Control channel closed, stopping heartbeat");
                root.cancel();
                break;
            }
            Err(e) => warn!("Heartbeat send failed: {}", e),
        }

        tokio::select! {
            () = scope.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
}
