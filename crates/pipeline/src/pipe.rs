//! Track pipe: drives one provider into one consumer.
//!
//! A pipe is woken by its consumer's ready signal (or by cancellation),
//! pumps units while the consumer stays ready, then parks again. Once the
//! provider is exhausted or the sink refuses a unit the pipe finishes the
//! consumer and runs its completion callback, each exactly once. A pipe
//! dropped before that point still finishes its consumer.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use trackmux_common::{MuxError, MuxResult};

use crate::adapter::{Adapter, PixelBufferAdaptable, TimedMetadataAdaptable};
use crate::consumer::{Consumer, ReadySignal};
use crate::provider::{PixelBufferStream, Provider, RawSampleStream, TimedMetadataStream};

/// Why a pipe stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeOutcome {
    /// The provider ran dry.
    Exhausted,
    /// The sink refused a unit.
    Rejected,
    /// The session was cancelled.
    Cancelled,
}

/// Summary handed to the completion callback and returned from [`TrackPipe::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipeReport {
    pub label: String,
    pub delivered: u64,
    pub outcome: PipeOutcome,
}

type CompletionFn = Box<dyn FnOnce(&PipeReport) + Send>;

enum Route {
    Raw(RawSampleStream),
    TimedMetadata {
        stream: TimedMetadataStream,
        adapter: Box<dyn TimedMetadataAdaptable>,
    },
    PixelBuffer {
        stream: PixelBufferStream,
        adapter: Box<dyn PixelBufferAdaptable>,
    },
}

enum Delivery {
    Delivered,
    Exhausted,
    Rejected,
}

impl Delivery {
    fn from_accepted(accepted: bool) -> Self {
        if accepted {
            Delivery::Delivered
        } else {
            Delivery::Rejected
        }
    }
}

impl Route {
    fn deliver_one(&mut self, consumer: &mut dyn Consumer) -> Delivery {
        match self {
            Route::Raw(stream) => match stream.next_sample() {
                Some(sample) => Delivery::from_accepted(consumer.append(sample)),
                None => Delivery::Exhausted,
            },
            Route::TimedMetadata { stream, adapter } => match stream.next_group() {
                Some(group) => Delivery::from_accepted(adapter.append(group)),
                None => Delivery::Exhausted,
            },
            Route::PixelBuffer { stream, adapter } => match stream.next_pixel_buffer() {
                Some(frame) => Delivery::from_accepted(adapter.append(frame.buffer, frame.time)),
                None => Delivery::Exhausted,
            },
        }
    }
}

/// One (provider, consumer, adapter) triple and its finished flag.
pub struct TrackPipe {
    label: String,
    route: Route,
    consumer: Box<dyn Consumer>,
    finished: bool,
    outcome: Option<PipeOutcome>,
    delivered: u64,
    completion: Option<CompletionFn>,
}

impl TrackPipe {
    /// Pair a provider with its consumer.
    ///
    /// Metadata and pixel-buffer providers need the matching adapter. A raw
    /// provider ignores any adapter it is given.
    pub fn new(
        label: impl Into<String>,
        provider: Provider,
        consumer: Box<dyn Consumer>,
        adapter: Option<Adapter>,
    ) -> MuxResult<Self> {
        let label = label.into();
        let route = match (provider, adapter) {
            (Provider::Raw(stream), adapter) => {
                if let Some(adapter) = adapter {
                    tracing::debug!(pipe = %label, adapter = adapter.name(), "Ignoring adapter on raw sample pipe");
                }
                Route::Raw(stream)
            }
            (Provider::TimedMetadata(stream), Some(Adapter::TimedMetadata(adapter))) => {
                Route::TimedMetadata { stream, adapter }
            }
            (Provider::PixelBuffer(stream), Some(Adapter::PixelBuffer(adapter))) => {
                Route::PixelBuffer { stream, adapter }
            }
            (provider, Some(adapter)) => {
                return Err(MuxError::configuration(format!(
                    "pipe '{label}': {:?} provider cannot use a {} adapter",
                    provider.kind(),
                    adapter.name()
                )))
            }
            (provider, None) => {
                return Err(MuxError::configuration(format!(
                    "pipe '{label}': {:?} provider requires an adapter",
                    provider.kind()
                )))
            }
        };

        Ok(Self {
            label,
            route,
            consumer,
            finished: false,
            outcome: None,
            delivered: 0,
            completion: None,
        })
    }

    /// Set the callback run once the consumer has been finished.
    pub fn on_complete(mut self, callback: impl FnOnce(&PipeReport) + Send + 'static) -> Self {
        self.completion = Some(Box::new(callback));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn report(&self) -> PipeReport {
        PipeReport {
            label: self.label.clone(),
            delivered: self.delivered,
            outcome: self.outcome.unwrap_or(PipeOutcome::Exhausted),
        }
    }

    /// Handle one wake-up. Returns whether the pipe is finished.
    pub fn service_wake(&mut self, cancel: &CancellationToken) -> bool {
        if self.finished {
            return true;
        }

        if cancel.is_cancelled() {
            self.outcome = Some(PipeOutcome::Cancelled);
            self.finished = true;
        }

        while !self.finished && self.consumer.is_ready() {
            match self.route.deliver_one(self.consumer.as_mut()) {
                Delivery::Delivered => self.delivered += 1,
                Delivery::Exhausted => {
                    self.outcome = Some(PipeOutcome::Exhausted);
                    self.finished = true;
                }
                Delivery::Rejected => {
                    tracing::warn!(pipe = %self.label, delivered = self.delivered, "Sink rejected unit, finishing pipe");
                    self.outcome = Some(PipeOutcome::Rejected);
                    self.finished = true;
                }
            }
        }

        if self.finished {
            self.complete();
        }
        self.finished
    }

    fn complete(&mut self) {
        self.consumer.finish();
        let report = self.report();
        tracing::debug!(
            pipe = %report.label,
            delivered = report.delivered,
            outcome = ?report.outcome,
            "Track pipe finished"
        );
        if let Some(callback) = self.completion.take() {
            callback(&report);
        }
    }

    /// Pump until finished, parking on the consumer's ready signal between
    /// bursts.
    pub async fn run(mut self, cancel: CancellationToken) -> PipeReport {
        let wake = Arc::new(Notify::new());
        tracing::debug!(pipe = %self.label, "Track pipe started");

        while !self.finished {
            self.consumer.on_ready(ReadySignal::new(wake.clone()));
            tokio::select! {
                _ = wake.notified() => {}
                _ = cancel.cancelled() => {}
            }
            self.service_wake(&cancel);
        }

        self.report()
    }
}

impl Drop for TrackPipe {
    /// A pipe torn down mid-stream (its task panicked or was aborted) still
    /// closes its consumer so the writer's drain ends. The completion
    /// callback is dropped without running.
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(
            pipe = %self.label,
            delivered = self.delivered,
            "Track pipe dropped before finishing"
        );
        self.finished = true;
        self.consumer.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MetadataAdaptor;
    use crate::port::{input_port, InputSpec};
    use crate::provider::SampleIter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use trackmux_media_model::{
        Image, MediaKind, MediaTime, MetadataFormat, MetadataGroup, Sample, TimeRange,
    };

    #[derive(Default)]
    struct Recorded {
        samples: Vec<Sample>,
        finishes: usize,
        registrations: usize,
    }

    struct MockConsumer {
        log: Arc<Mutex<Recorded>>,
        accept_limit: Option<usize>,
    }

    impl MockConsumer {
        fn new(log: Arc<Mutex<Recorded>>) -> Self {
            Self {
                log,
                accept_limit: None,
            }
        }
    }

    impl Consumer for MockConsumer {
        fn is_ready(&self) -> bool {
            true
        }

        fn append(&mut self, sample: Sample) -> bool {
            let mut log = self.log.lock().unwrap();
            if log.finishes > 0 {
                return false;
            }
            if let Some(limit) = self.accept_limit {
                if log.samples.len() >= limit {
                    return false;
                }
            }
            log.samples.push(sample);
            true
        }

        fn on_ready(&mut self, signal: ReadySignal) {
            self.log.lock().unwrap().registrations += 1;
            signal.fire();
        }

        fn finish(&mut self) {
            self.log.lock().unwrap().finishes += 1;
        }
    }

    fn samples(n: usize) -> Box<dyn crate::provider::SampleProvider> {
        Box::new(SampleIter((0..n).map(|i| {
            Sample::new(
                MediaKind::Audio,
                MediaTime::new(i as i64 * 10, 600),
                MediaTime::new(10, 600),
                vec![i as u8],
            )
        })))
    }

    #[test]
    fn test_three_units_then_none_delivers_exactly_three() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let callbacks = Arc::new(AtomicUsize::new(0));
        let counter = callbacks.clone();
        let mut pipe = TrackPipe::new(
            "audio",
            Provider::raw(samples(3)),
            Box::new(MockConsumer::new(log.clone())),
            None,
        )
        .unwrap()
        .on_complete(move |report| {
            assert_eq!(report.delivered, 3);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let cancel = CancellationToken::new();
        assert!(pipe.service_wake(&cancel));
        assert_eq!(pipe.delivered(), 3);
        assert_eq!(pipe.report().outcome, PipeOutcome::Exhausted);

        // Later wake-ups are no-ops.
        assert!(pipe.service_wake(&cancel));
        assert!(pipe.is_finished());

        let log = log.lock().unwrap();
        assert_eq!(log.samples.len(), 3);
        assert_eq!(log.finishes, 1);
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejection_finishes_pipe() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let consumer = MockConsumer {
            log: log.clone(),
            accept_limit: Some(2),
        };
        let mut pipe =
            TrackPipe::new("audio", Provider::raw(samples(10)), Box::new(consumer), None).unwrap();

        assert!(pipe.service_wake(&CancellationToken::new()));
        let report = pipe.report();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.outcome, PipeOutcome::Rejected);
        assert_eq!(log.lock().unwrap().finishes, 1);
    }

    #[test]
    fn test_cancelled_pipe_delivers_nothing() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let mut pipe = TrackPipe::new(
            "audio",
            Provider::raw(samples(5)),
            Box::new(MockConsumer::new(log.clone())),
            None,
        )
        .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(pipe.service_wake(&cancel));
        assert_eq!(pipe.report().outcome, PipeOutcome::Cancelled);
        assert!(log.lock().unwrap().samples.is_empty());
        assert_eq!(log.lock().unwrap().finishes, 1);
    }

    #[test]
    fn test_non_raw_provider_requires_matching_adapter() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let images = vec![Image::solid(2, 2, [0, 0, 0, 255])];
        let ranges = vec![TimeRange::from_seconds(0.0, 1.0)];
        let err = TrackPipe::new(
            "image",
            Provider::pixel_buffers(images, ranges),
            Box::new(MockConsumer::new(log.clone())),
            None,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "configuration");

        let group = MetadataGroup::from_strings(&["a"], TimeRange::from_seconds(0.0, 1.0), "k");
        let format = MetadataFormat::from_groups(std::slice::from_ref(&group)).unwrap();
        let (input, _drain) = input_port(InputSpec::metadata("metadata-0", format), 1);
        let pixel = Image::solid(2, 2, [0, 0, 0, 255]).to_pixel_buffer().unwrap();
        let err = TrackPipe::new(
            "metadata-0",
            Provider::timed_metadata(vec![group]),
            Box::new(input.clone()),
            Some(Adapter::PixelBuffer(Box::new(
                crate::adapter::PixelBufferAdaptor::new(&input, pixel.attributes()),
            ))),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_raw_provider_ignores_adapter() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let group = MetadataGroup::from_strings(&["a"], TimeRange::from_seconds(0.0, 1.0), "k");
        let format = MetadataFormat::from_groups(std::slice::from_ref(&group)).unwrap();
        let (input, _drain) = input_port(InputSpec::metadata("metadata-0", format), 1);
        let mut pipe = TrackPipe::new(
            "audio",
            Provider::raw(samples(2)),
            Box::new(MockConsumer::new(log.clone())),
            Some(Adapter::TimedMetadata(Box::new(MetadataAdaptor::new(&input)))),
        )
        .unwrap();
        assert!(pipe.service_wake(&CancellationToken::new()));
        assert_eq!(log.lock().unwrap().samples.len(), 2);
        assert_eq!(input.appended(), 0);
    }

    #[tokio::test]
    async fn test_run_parks_on_full_input_until_drained() {
        let (input, mut drain) = input_port(InputSpec::passthrough(MediaKind::Audio, "audio", 1), 2);
        let pipe = TrackPipe::new("audio", Provider::raw(samples(25)), Box::new(input.clone()), None).unwrap();
        let handle = tokio::spawn(pipe.run(CancellationToken::new()));

        let mut received = Vec::new();
        while let Some(sample) = drain.next().await {
            received.push(sample);
        }
        let report = handle.await.unwrap();

        assert_eq!(received.len(), 25);
        assert!(received.windows(2).all(|w| w[0].pts < w[1].pts));
        assert_eq!(report.delivered, 25);
        assert_eq!(report.outcome, PipeOutcome::Exhausted);
        assert!(input.is_finished());
        assert!(input.wake_registrations() >= 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation_while_parked() {
        let (input, _drain) = input_port(InputSpec::passthrough(MediaKind::Audio, "audio", 1), 1);
        let pipe = TrackPipe::new("audio", Provider::raw(samples(10)), Box::new(input.clone()), None).unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pipe.run(cancel.clone()));

        tokio::task::yield_now().await;
        cancel.cancel();
        let report = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("cancel should wake a parked pipe")
            .unwrap();
        assert_eq!(report.outcome, PipeOutcome::Cancelled);
        assert!(report.delivered <= 1);
        assert!(input.is_finished());
    }

    #[test]
    fn test_dropped_pipe_finishes_consumer_without_callback() {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let callbacks = Arc::new(AtomicUsize::new(0));
        let counter = callbacks.clone();
        let pipe = TrackPipe::new(
            "audio",
            Provider::raw(samples(5)),
            Box::new(MockConsumer::new(log.clone())),
            None,
        )
        .unwrap()
        .on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(pipe);
        assert_eq!(log.lock().unwrap().finishes, 1);
        assert_eq!(callbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_provider_closes_input() {
        let (input, mut drain) = input_port(InputSpec::passthrough(MediaKind::Audio, "audio", 1), 2);
        let source = SampleIter((0..10).map(|i| {
            if i == 3 {
                panic!("source track vanished");
            }
            Sample::new(
                MediaKind::Audio,
                MediaTime::new(i, 600),
                MediaTime::new(1, 600),
                vec![],
            )
        }));
        let pipe = TrackPipe::new("audio", Provider::raw(Box::new(source)), Box::new(input.clone()), None).unwrap();
        let handle = tokio::spawn(pipe.run(CancellationToken::new()));

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            let mut n = 0;
            while drain.next().await.is_some() {
                n += 1;
            }
            n
        })
        .await
        .expect("drain should end once the panicked pipe is dropped");

        assert_eq!(received, 3);
        assert!(handle.await.unwrap_err().is_panic());
        assert!(input.is_finished());
    }
}
