//! Export session controller.
//!
//! Builds one [`TrackPipe`] per output track, starts the reader and writer,
//! runs every pipe as its own task, waits on the completion barrier, then
//! finalizes the writer and resolves the session state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use trackmux_common::{ExportDefaults, MuxError, MuxResult};
use trackmux_media_model::{
    Image, MediaKind, MediaTime, MetadataFormat, MetadataGroup, PixelBuffer, TimeRange,
};

use crate::adapter::{Adapter, MetadataAdaptor, PixelBufferAdaptor};
use crate::barrier::CompletionBarrier;
use crate::pipe::{PipeOutcome, TrackPipe};
use crate::port::InputSpec;
use crate::provider::{PixelBufferStream, Provider};
use crate::reader::{AssetReader, ReaderStatus};
use crate::state::{SessionState, StateSlot};
use crate::writer::{ContainerKind, ContainerWriter, WriterStatus};

/// Per-job export settings.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub destination: PathBuf,
    pub container: ContainerKind,

    /// Units each writer input buffers before its pipe parks.
    pub input_capacity: usize,

    /// Upper bound on the completion wait. `None` waits indefinitely.
    pub completion_timeout: Option<Duration>,

    /// Worker threads for [`Exporter::export_blocking`].
    pub worker_threads: Option<usize>,
}

impl ExportConfig {
    pub fn new(destination: impl Into<PathBuf>, container: ContainerKind) -> Self {
        let defaults = ExportDefaults::default();
        Self {
            destination: destination.into(),
            container,
            input_capacity: defaults.input_capacity,
            completion_timeout: None,
            worker_threads: None,
        }
    }

    /// Settings from the application's configured defaults.
    pub fn from_defaults(
        destination: impl Into<PathBuf>,
        defaults: &ExportDefaults,
    ) -> MuxResult<Self> {
        let container = defaults.container.parse()?;
        let completion_timeout = match defaults.completion_timeout_secs {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) => {
                return Err(MuxError::configuration(format!(
                    "completion timeout must be positive, got {secs}"
                )))
            }
            None => None,
        };
        Ok(Self {
            destination: destination.into(),
            container,
            input_capacity: defaults.input_capacity.max(1),
            completion_timeout,
            worker_threads: defaults.worker_threads,
        })
    }

    pub fn with_input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity.max(1);
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = Some(timeout);
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }
}

/// Still images rendered into a synthetic video track.
#[derive(Debug, Clone, Default)]
pub struct ImageTrack {
    pub images: Vec<Image>,
    pub time_ranges: Vec<TimeRange>,

    /// Export source video tracks alongside the image track instead of
    /// replacing them.
    pub keep_source_video: bool,
}

impl ImageTrack {
    pub fn new(images: Vec<Image>, time_ranges: Vec<TimeRange>) -> Self {
        Self {
            images,
            time_ranges,
            keep_source_video: false,
        }
    }

    fn replaces_video(&self) -> bool {
        !self.images.is_empty() && !self.keep_source_video
    }
}

/// Synthetic tracks added on top of the source tracks.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// Each inner list becomes one metadata track.
    pub timed_metadata: Vec<Vec<MetadataGroup>>,
    pub image_track: Option<ImageTrack>,
}

impl ExportRequest {
    pub fn with_metadata(mut self, groups: Vec<MetadataGroup>) -> Self {
        self.timed_metadata.push(groups);
        self
    }

    pub fn with_image_track(mut self, track: ImageTrack) -> Self {
        self.image_track = Some(track);
        self
    }
}

/// Snapshot of how far an export has come.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportProgress {
    pub pipes_total: usize,
    pub pipes_finished: usize,
    pub units_delivered: u64,
}

/// Drives a single export session.
pub struct Exporter {
    config: ExportConfig,
    state: StateSlot,
    cancel: CancellationToken,
    progress: Arc<Mutex<ExportProgress>>,
    started: AtomicBool,
    finalized: AtomicBool,
}

impl Exporter {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            state: StateSlot::new(),
            cancel: CancellationToken::new(),
            progress: Arc::new(Mutex::new(ExportProgress::default())),
            started: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.config.destination
    }

    pub fn container(&self) -> ContainerKind {
        self.config.container
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn progress(&self) -> ExportProgress {
        match self.progress.lock() {
            Ok(progress) => *progress,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Ask every pipe to stop. The session resolves `Cancelled` once the
    /// pipes have wound down.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(destination = %self.config.destination.display(), "Export cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the export to completion and return the terminal state.
    ///
    /// An exporter runs at most once; later calls return the current state.
    pub async fn export(
        &self,
        reader: &mut dyn AssetReader,
        writer: &mut dyn ContainerWriter,
        request: ExportRequest,
    ) -> SessionState {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("Export already ran on this exporter");
            return self.state();
        }

        let started_at = Instant::now();
        tracing::info!(
            destination = %self.config.destination.display(),
            container = %self.config.container,
            "Starting export"
        );

        let pipes = match self.build_pipes(reader, writer, request) {
            Ok(pipes) => pipes,
            Err(e) => return self.fail_setup(e),
        };
        if let Err(e) = self.start(reader, writer) {
            return self.fail_setup(e);
        }

        self.state.begin_exporting();
        writer.start_session(MediaTime::ZERO);
        self.update_progress(|p| p.pipes_total = pipes.len());

        let barrier = CompletionBarrier::new();
        let mut tasks = JoinSet::new();
        for pipe in pipes {
            let lease = barrier.enter();
            let progress = self.progress.clone();
            let pipe = pipe.on_complete(move |report| {
                if let Ok(mut p) = progress.lock() {
                    p.pipes_finished += 1;
                    p.units_delivered += report.delivered;
                }
                drop(lease);
            });
            tasks.spawn(pipe.run(self.cancel.clone()));
        }
        tracing::debug!(pipes = barrier.entered(), "Launched track pipes");

        if !barrier.wait_timeout(self.config.completion_timeout).await {
            let waited_ms = self
                .config
                .completion_timeout
                .map(|t| t.as_millis() as u64)
                .unwrap_or_default();
            tracing::warn!(
                pending = barrier.pending(),
                waited_ms,
                "Track pipes did not complete in time"
            );
            self.cancel.cancel();
            tasks.abort_all();
            self.finalize_with(|| {
                writer.cancel_writing();
                reader.cancel_reading();
                SessionState::failed(MuxError::CompletionTimeout { waited_ms })
            });
            return self.log_outcome(started_at);
        }

        let mut aborted = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) if report.outcome == PipeOutcome::Rejected => {
                    tracing::warn!(pipe = %report.label, delivered = report.delivered, "Track pipe stopped early")
                }
                Ok(report) => {
                    tracing::debug!(pipe = %report.label, delivered = report.delivered, outcome = ?report.outcome, "Track pipe joined")
                }
                Err(e) => {
                    tracing::error!(error = %e, "Track pipe task failed");
                    aborted += 1;
                }
            }
        }

        // A pipe that died mid-stream left its track truncated.
        if aborted > 0 {
            self.cancel.cancel();
            self.finalize_with(|| {
                writer.cancel_writing();
                reader.cancel_reading();
                SessionState::failed(MuxError::Unknown)
            });
            return self.log_outcome(started_at);
        }

        self.finalize(reader, writer).await;
        self.log_outcome(started_at)
    }

    /// Run [`Exporter::export`] on a dedicated runtime. Must be called from
    /// outside any tokio runtime.
    pub fn export_blocking(
        &self,
        reader: &mut dyn AssetReader,
        writer: &mut dyn ContainerWriter,
        request: ExportRequest,
    ) -> MuxResult<SessionState> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(MuxError::configuration(
                "export_blocking cannot run inside an async runtime, await export instead",
            ));
        }
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("trackmux-export");
        if let Some(threads) = self.config.worker_threads {
            builder.worker_threads(threads.max(1));
        }
        let runtime = builder.build()?;
        Ok(runtime.block_on(self.export(reader, writer, request)))
    }

    fn build_pipes(
        &self,
        reader: &mut dyn AssetReader,
        writer: &mut dyn ContainerWriter,
        request: ExportRequest,
    ) -> MuxResult<Vec<TrackPipe>> {
        let capacity = self.config.input_capacity;
        let replaces_video = request
            .image_track
            .as_ref()
            .is_some_and(ImageTrack::replaces_video);
        let mut pipes = Vec::new();

        for track in reader.tracks() {
            if replaces_video && track.kind == MediaKind::Video {
                tracing::info!(track = track.id, "Source video track replaced by image track");
                continue;
            }
            let label = track.display_label();
            let output = reader.track_output(track.id)?;
            let input = writer.add_input(
                InputSpec::passthrough(track.kind, &label, track.id),
                capacity,
            )?;
            pipes.push(TrackPipe::new(
                label,
                Provider::raw(output),
                Box::new(input),
                None,
            )?);
        }

        for (index, groups) in request.timed_metadata.into_iter().enumerate() {
            if groups.is_empty() {
                tracing::warn!(index, "Skipping empty metadata group list");
                continue;
            }
            let format = MetadataFormat::from_groups(&groups)?;
            let label = format!("metadata-{index}");
            let input = writer.add_input(InputSpec::metadata(&label, format), capacity)?;
            let adapter = Adapter::TimedMetadata(Box::new(MetadataAdaptor::new(&input)));
            pipes.push(TrackPipe::new(
                label,
                Provider::timed_metadata(groups),
                Box::new(input),
                Some(adapter),
            )?);
        }

        if let Some(track) = request.image_track {
            if track.images.is_empty() {
                tracing::warn!("Image track has no images, skipping");
            } else {
                let stream = PixelBufferStream::new(track.images, track.time_ranges);
                let attributes = stream
                    .first_pixel_buffer()
                    .map(PixelBuffer::attributes)
                    .ok_or_else(|| {
                        MuxError::configuration("image track has no usable first frame")
                    })?;
                let input =
                    writer.add_input(InputSpec::pixel_buffer("image", attributes), capacity)?;
                let adapter =
                    Adapter::PixelBuffer(Box::new(PixelBufferAdaptor::new(&input, attributes)));
                pipes.push(TrackPipe::new(
                    "image",
                    Provider::PixelBuffer(stream),
                    Box::new(input),
                    Some(adapter),
                )?);
            }
        }

        Ok(pipes)
    }

    fn start(
        &self,
        reader: &mut dyn AssetReader,
        writer: &mut dyn ContainerWriter,
    ) -> MuxResult<()> {
        if !reader.start_reading() {
            let cause = reader
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "reader could not start".to_string());
            return Err(MuxError::start_failed(cause));
        }
        if !writer.start_writing() {
            reader.cancel_reading();
            let cause = writer
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "writer could not start".to_string());
            return Err(MuxError::start_failed(cause));
        }
        Ok(())
    }

    fn fail_setup(&self, error: MuxError) -> SessionState {
        tracing::error!(error = %error, kind = error.kind(), "Export setup failed");
        self.finalized.store(true, Ordering::Release);
        self.state.resolve(SessionState::failed(error));
        self.state()
    }

    async fn finalize(&self, reader: &mut dyn AssetReader, writer: &mut dyn ContainerWriter) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            tracing::debug!("Export already finalized");
            return;
        }

        let reader_failed = reader.status() == ReaderStatus::Failed;
        let writer_failed = writer.status() == WriterStatus::Failed;

        if reader_failed || writer_failed {
            let error = writer
                .error()
                .or_else(|| reader.error())
                .unwrap_or(MuxError::Unknown);
            writer.cancel_writing();
            self.state.resolve(SessionState::failed(error));
            return;
        }

        if self.cancel.is_cancelled() {
            writer.cancel_writing();
            reader.cancel_reading();
        } else {
            writer.finish_writing().await;
        }

        match writer.status() {
            WriterStatus::Failed => {
                let error = writer.error().unwrap_or(MuxError::Unknown);
                self.state.resolve(SessionState::failed(error));
            }
            WriterStatus::Cancelled => {
                self.state.resolve(SessionState::Cancelled);
            }
            WriterStatus::Completed => {
                self.state.resolve(SessionState::Finished);
            }
            other => {
                tracing::warn!(status = ?other, "Writer ended in a non-final status");
            }
        }
    }

    fn finalize_with(&self, resolve: impl FnOnce() -> SessionState) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.resolve(resolve());
    }

    fn update_progress(&self, f: impl FnOnce(&mut ExportProgress)) {
        if let Ok(mut progress) = self.progress.lock() {
            f(&mut progress);
        }
    }

    fn log_outcome(&self, started_at: Instant) -> SessionState {
        let state = self.state();
        let progress = self.progress();
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match state.error() {
            Some(error) => tracing::error!(
                error = %error,
                kind = error.kind(),
                elapsed_ms,
                "Export failed"
            ),
            None => tracing::info!(
                state = state.name(),
                pipes = progress.pipes_total,
                units = progress.units_delivered,
                elapsed_ms,
                "Export ended"
            ),
        }
        state
    }
}
