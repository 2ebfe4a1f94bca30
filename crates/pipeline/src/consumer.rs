//! The sink side of a track pipe.

use std::sync::Arc;

use tokio::sync::Notify;
use trackmux_media_model::Sample;

/// A one-shot wake-up handed to a [`Consumer`].
///
/// Firing consumes the signal, so a consumer can wake its pipe at most
/// once per registration. A pipe that wants further wake-ups must register
/// a new signal after each one fires.
#[derive(Debug)]
pub struct ReadySignal {
    notify: Arc<Notify>,
}

impl ReadySignal {
    pub fn new(notify: Arc<Notify>) -> Self {
        Self { notify }
    }

    /// Wake the pipe that registered this signal.
    ///
    /// If the pipe is not parked yet the wake-up is kept as a permit and
    /// consumed by its next wait.
    pub fn fire(self) {
        self.notify.notify_one();
    }
}

/// Accepts raw samples for one output track.
pub trait Consumer: Send {
    /// Whether the consumer can take another unit right now.
    fn is_ready(&self) -> bool;

    /// Append one sample. `false` means the sample was not accepted.
    fn append(&mut self, sample: Sample) -> bool;

    /// Register the single outstanding wake-up. The consumer fires it when
    /// it becomes ready, or immediately if it already is.
    fn on_ready(&mut self, signal: ReadySignal);

    /// Mark the track as complete. Idempotent; no appends succeed after.
    fn finish(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_fired_before_wait_is_not_lost() {
        let notify = Arc::new(Notify::new());
        ReadySignal::new(notify.clone()).fire();

        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("permit should be stored for the next wait");
    }
}
