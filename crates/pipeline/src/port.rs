//! Channel-backed writer inputs.
//!
//! Every container writer hands out the same kind of input: a bounded
//! queue whose producer half ([`WriterInput`]) is the pipe's [`Consumer`]
//! and whose consumer half ([`InputDrain`]) stays with the writer. Draining
//! a unit frees queue capacity and fires the pipe's pending ready signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use trackmux_media_model::{MediaKind, MetadataFormat, PixelBufferAttributes, Sample};

use crate::consumer::{Consumer, ReadySignal};

/// How a writer should describe an input's samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormatHint {
    /// Samples are copied as-is from a source track.
    Passthrough { source_track: Option<u32> },
    /// Timed metadata with the given item specifications.
    Metadata { format: MetadataFormat },
    /// Uncompressed frames produced from pixel buffers.
    PixelBuffer { attributes: PixelBufferAttributes },
}

/// Declaration of one writer input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub kind: MediaKind,
    pub label: String,
    pub format: FormatHint,
}

impl InputSpec {
    pub fn passthrough(kind: MediaKind, label: impl Into<String>, source_track: u32) -> Self {
        Self {
            kind,
            label: label.into(),
            format: FormatHint::Passthrough {
                source_track: Some(source_track),
            },
        }
    }

    pub fn metadata(label: impl Into<String>, format: MetadataFormat) -> Self {
        Self {
            kind: MediaKind::Metadata,
            label: label.into(),
            format: FormatHint::Metadata { format },
        }
    }

    pub fn pixel_buffer(label: impl Into<String>, attributes: PixelBufferAttributes) -> Self {
        Self {
            kind: MediaKind::Video,
            label: label.into(),
            format: FormatHint::PixelBuffer { attributes },
        }
    }
}

struct PortShared {
    spec: InputSpec,
    sender: Mutex<Option<mpsc::Sender<Sample>>>,
    ready_slot: Mutex<Option<ReadySignal>>,
    registrations: AtomicU64,
    appended: AtomicU64,
    finished: AtomicBool,
}

impl PortShared {
    fn wake_producer(&self) {
        let signal = match self.ready_slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(signal) = signal {
            signal.fire();
        }
    }
}

/// Create a writer input with room for `capacity` queued units.
pub fn input_port(spec: InputSpec, capacity: usize) -> (WriterInput, InputDrain) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(PortShared {
        spec,
        sender: Mutex::new(Some(sender)),
        ready_slot: Mutex::new(None),
        registrations: AtomicU64::new(0),
        appended: AtomicU64::new(0),
        finished: AtomicBool::new(false),
    });
    (
        WriterInput {
            shared: shared.clone(),
        },
        InputDrain { shared, receiver },
    )
}

/// Producer half of a writer input. Cloning yields another handle to the
/// same input, which is how adapters append through it.
#[derive(Clone)]
pub struct WriterInput {
    shared: Arc<PortShared>,
}

impl WriterInput {
    pub fn spec(&self) -> &InputSpec {
        &self.shared.spec
    }

    /// Queue a sample without waiting. Fails once the input is finished,
    /// the queue is full, or the writer stopped draining.
    pub fn push(&self, sample: Sample) -> bool {
        let guard = match self.shared.sender.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        match sender.try_send(sample) {
            Ok(()) => {
                self.shared.appended.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::debug!(input = %self.shared.spec.label, error = %e, "Writer input refused sample");
                false
            }
        }
    }

    /// Ready while the queue has room. A finished input, or one whose
    /// writer went away, also reports ready so the next append fails fast
    /// instead of parking forever.
    pub fn ready(&self) -> bool {
        match self.shared.sender.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(sender) => sender.is_closed() || sender.capacity() > 0,
                None => true,
            },
            Err(_) => true,
        }
    }

    /// Number of ready signals registered so far.
    pub fn wake_registrations(&self) -> u64 {
        self.shared.registrations.load(Ordering::Relaxed)
    }

    /// Number of samples accepted so far.
    pub fn appended(&self) -> u64 {
        self.shared.appended.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }
}

impl Consumer for WriterInput {
    fn is_ready(&self) -> bool {
        self.ready()
    }

    fn append(&mut self, sample: Sample) -> bool {
        self.push(sample)
    }

    fn on_ready(&mut self, signal: ReadySignal) {
        self.shared.registrations.fetch_add(1, Ordering::Relaxed);
        // Park the signal before checking readiness: a drain that frees
        // capacity in between will find it in the slot.
        if let Ok(mut slot) = self.shared.ready_slot.lock() {
            if slot.replace(signal).is_some() {
                tracing::warn!(input = %self.shared.spec.label, "Replaced an unfired ready signal");
            }
        }
        if self.ready() {
            self.shared.wake_producer();
        }
    }

    fn finish(&mut self) {
        if self.shared.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut sender) = self.shared.sender.lock() {
            sender.take();
        }
        tracing::debug!(
            input = %self.shared.spec.label,
            appended = self.appended(),
            "Writer input marked as finished"
        );
    }
}

/// Writer-side half of an input.
pub struct InputDrain {
    shared: Arc<PortShared>,
    receiver: mpsc::Receiver<Sample>,
}

impl InputDrain {
    pub fn spec(&self) -> &InputSpec {
        &self.shared.spec
    }

    /// Wait for the next queued sample. Returns `None` once the input is
    /// finished and every queued sample has been taken.
    pub async fn next(&mut self) -> Option<Sample> {
        let sample = self.receiver.recv().await;
        self.shared.wake_producer();
        sample
    }

    /// Blocking form of [`InputDrain::next`] for writers that drain on a
    /// blocking thread. Panics if called from within an async context.
    pub fn blocking_next(&mut self) -> Option<Sample> {
        let sample = self.receiver.blocking_recv();
        self.shared.wake_producer();
        sample
    }
}

impl Drop for InputDrain {
    fn drop(&mut self) {
        self.receiver.close();
        self.shared.wake_producer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;
    use trackmux_media_model::MediaTime;

    fn sample(n: i64) -> Sample {
        Sample::new(
            MediaKind::Audio,
            MediaTime::new(n, 600),
            MediaTime::new(1, 600),
            vec![n as u8],
        )
    }

    fn spec() -> InputSpec {
        InputSpec::passthrough(MediaKind::Audio, "audio", 1)
    }

    #[tokio::test]
    async fn test_full_queue_reports_not_ready_until_drained() {
        let (mut input, mut drain) = input_port(spec(), 2);
        assert!(input.append(sample(0)));
        assert!(input.append(sample(1)));
        assert!(!input.is_ready());
        assert!(!input.append(sample(2)));

        let notify = Arc::new(Notify::new());
        input.on_ready(ReadySignal::new(notify.clone()));

        assert_eq!(drain.next().await, Some(sample(0)));
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("draining should fire the ready signal");
        assert!(input.is_ready());
        assert_eq!(input.wake_registrations(), 1);
    }

    #[tokio::test]
    async fn test_on_ready_fires_immediately_when_ready() {
        let (mut input, _drain) = input_port(spec(), 1);
        let notify = Arc::new(Notify::new());
        input.on_ready(ReadySignal::new(notify.clone()));
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("ready input should fire at registration");
    }

    #[tokio::test]
    async fn test_finish_closes_after_queued_samples() {
        let (mut input, mut drain) = input_port(spec(), 4);
        assert!(input.append(sample(0)));
        input.finish();
        input.finish();
        assert!(input.is_finished());
        assert!(!input.append(sample(1)));

        assert_eq!(drain.next().await, Some(sample(0)));
        assert_eq!(drain.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_drain_wakes_and_rejects() {
        let (mut input, drain) = input_port(spec(), 1);
        assert!(input.append(sample(0)));
        assert!(!input.is_ready());

        let notify = Arc::new(Notify::new());
        input.on_ready(ReadySignal::new(notify.clone()));
        drop(drain);

        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("dropping the drain should wake the producer");
        assert!(input.is_ready());
        assert!(!input.append(sample(1)));
    }

    #[tokio::test]
    async fn test_clones_share_the_queue() {
        let (input, mut drain) = input_port(spec(), 4);
        let mut handle = input.clone();
        assert!(handle.append(sample(7)));
        assert_eq!(input.appended(), 1);
        assert_eq!(drain.next().await, Some(sample(7)));
    }

    #[test]
    fn test_blocking_drain_outside_runtime() {
        let (mut input, mut drain) = input_port(spec(), 2);
        assert!(input.append(sample(3)));
        input.finish();
        assert_eq!(drain.blocking_next(), Some(sample(3)));
        assert_eq!(drain.blocking_next(), None);
    }
}
