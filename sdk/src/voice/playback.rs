use tokio::sync::watch;

/// Snapshot of what the pacer is doing with the frame queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackState {
    /// Frames are being drained from the queue.
    pub playing: bool,
    /// The remote has been told we are speaking.
    pub speaking: bool,
    /// Talk bursts started since the session was created.
    pub runs_started: u64,
    /// Talk bursts that ran to the end of their silence tail.
    pub runs_completed: u64,
}

/// Observable playback status. The pacer is the only writer.
#[derive(Clone)]
pub struct Playback {
    tx: watch::Sender<PlaybackState>,
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

impl Playback {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PlaybackState::default());
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.tx.borrow().playing
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.tx.borrow().speaking
    }

    /// Resolves when the current run completes, or the next one if idle.
    ///
    /// Frames still sitting in the queue count as the next run, so pushing
    /// a burst and then awaiting this waits for the whole burst.
    pub async fn completion(&self) {
        let mut rx = self.tx.subscribe();
        let completed = rx.borrow_and_update().runs_completed;
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| state.runs_completed > completed).await;
    }

    pub(crate) fn start_run(&self) {
        self.tx.send_if_modified(|state| {
            if state.playing {
                return false;
            }
            state.playing = true;
            state.runs_started += 1;
            true
        });
    }

    pub(crate) fn finish_run(&self) {
        self.tx.send_if_modified(|state| {
            if !state.playing {
                return false;
            }
            state.playing = false;
            state.runs_completed += 1;
            true
        });
    }

    pub(crate) fn set_speaking(&self, speaking: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.speaking != speaking;
            state.speaking = speaking;
            changed
        });
    }

    /// Forces the idle state, e.g. when the session goes away mid-burst.
    pub(crate) fn reset(&self) {
        self.tx.send_if_modified(|state| {
            let changed = state.playing || state.speaking;
            state.playing = false;
            state.speaking = false;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn runs_are_counted_once() {
        let playback = Playback::new();
        playback.start_run();
        playback.start_run();
        assert!(playback.is_playing());
        playback.finish_run();
        playback.finish_run();

        let state = playback.state();
        assert!(!state.playing);
        assert_eq!(state.runs_started, 1);
        assert_eq!(state.runs_completed, 1);
    }

    #[tokio::test]
    async fn completion_resolves_when_run_finishes() {
        let playback = Playback::new();
        playback.start_run();

        let waiter = {
            let playback = playback.clone();
            tokio::spawn(async move { playback.completion().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        playback.finish_run();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn completion_waits_for_next_run_when_idle() {
        let playback = Playback::new();
        playback.start_run();
        playback.finish_run();

        let waiter = {
            let playback = playback.clone();
            tokio::spawn(async move { playback.completion().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        playback.start_run();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        playback.finish_run();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(playback.state().runs_completed, 2);
    }
}
