//! In-memory asset reader and container writer.
//!
//! Used by tests and demos to run real exports without touching disk.
//! Both sides support failure injection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use trackmux_common::{MuxError, MuxResult};
use trackmux_media_model::{MediaKind, MediaTime, Sample, DEFAULT_TIMESCALE};
use trackmux_pipeline::{
    input_port, AssetReader, ContainerKind, ContainerWriter, InputDrain, InputSpec,
    ReaderStatus, SampleProvider, TrackInfo, WriterInput, WriterStatus,
};

use crate::status::{ReaderCell, WriterCell};

/// One source track held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTrack {
    pub info: TrackInfo,
    pub samples: Vec<Sample>,
}

impl MemoryTrack {
    pub fn new(info: TrackInfo, samples: Vec<Sample>) -> Self {
        Self { info, samples }
    }

    /// Back-to-back samples of `sample_secs` covering exactly
    /// `duration_secs`; the last sample is shortened to fit.
    pub fn synthetic(id: u32, kind: MediaKind, sample_secs: f64, duration_secs: f64) -> Self {
        let timescale = DEFAULT_TIMESCALE;
        let step = MediaTime::from_seconds(sample_secs, timescale).value.max(1);
        let total = MediaTime::from_seconds(duration_secs, timescale).value.max(0);

        let mut samples = Vec::new();
        let mut pts = 0;
        while pts < total {
            let duration = step.min(total - pts);
            let payload = format!("{kind}-{id}-{}", samples.len()).into_bytes();
            samples.push(Sample::new(
                kind,
                MediaTime::new(pts, timescale),
                MediaTime::new(duration, timescale),
                payload,
            ));
            pts += duration;
        }

        Self::new(TrackInfo::new(id, kind), samples)
    }

    /// End of the last sample.
    pub fn duration(&self) -> MediaTime {
        self.samples
            .iter()
            .map(Sample::end)
            .max()
            .unwrap_or(MediaTime::ZERO)
    }
}

/// A synthetic source: an audio and/or video track of fixed length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSource {
    pub duration_secs: f64,
    pub audio: bool,
    pub video: bool,
}

impl SyntheticSource {
    pub const AUDIO_SAMPLE_SECS: f64 = 0.05;
    pub const VIDEO_FRAME_SECS: f64 = 1.0 / 30.0;

    pub fn tracks(&self) -> Vec<MemoryTrack> {
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(MemoryTrack::synthetic(
                tracks.len() as u32 + 1,
                MediaKind::Audio,
                Self::AUDIO_SAMPLE_SECS,
                self.duration_secs,
            ));
        }
        if self.video {
            tracks.push(MemoryTrack::synthetic(
                tracks.len() as u32 + 1,
                MediaKind::Video,
                Self::VIDEO_FRAME_SECS,
                self.duration_secs,
            ));
        }
        tracks
    }
}

/// In-memory [`AssetReader`].
pub struct MemoryAsset {
    tracks: Vec<MemoryTrack>,
    cell: ReaderCell,
    fail_after: Option<usize>,
    read: Arc<AtomicUsize>,
}

impl MemoryAsset {
    pub fn new(tracks: Vec<MemoryTrack>) -> Self {
        Self {
            tracks,
            cell: ReaderCell::new(),
            fail_after: None,
            read: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail reading once `samples` samples have been read across all tracks.
    pub fn with_failure_after(mut self, samples: usize) -> Self {
        self.fail_after = Some(samples);
        self
    }

    /// Samples handed out so far.
    pub fn samples_read(&self) -> usize {
        self.read.load(Ordering::Relaxed)
    }
}

impl AssetReader for MemoryAsset {
    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.iter().map(|t| t.info.clone()).collect()
    }

    fn track_output(&mut self, track_id: u32) -> MuxResult<Box<dyn SampleProvider>> {
        if self.cell.status() != ReaderStatus::Unknown {
            return Err(MuxError::configuration(
                "track outputs must be requested before reading starts",
            ));
        }
        let track = self
            .tracks
            .iter()
            .find(|t| t.info.id == track_id)
            .ok_or_else(|| MuxError::configuration(format!("no track with id {track_id}")))?;

        self.cell.output_opened();
        Ok(Box::new(MemoryTrackOutput {
            samples: track.samples.clone().into_iter(),
            cell: self.cell.clone(),
            fail_after: self.fail_after,
            read: self.read.clone(),
            done: false,
        }))
    }

    fn start_reading(&mut self) -> bool {
        self.cell.start()
    }

    fn status(&self) -> ReaderStatus {
        self.cell.status()
    }

    fn error(&self) -> Option<MuxError> {
        self.cell.error()
    }

    fn cancel_reading(&mut self) {
        self.cell.cancel();
    }
}

struct MemoryTrackOutput {
    samples: std::vec::IntoIter<Sample>,
    cell: ReaderCell,
    fail_after: Option<usize>,
    read: Arc<AtomicUsize>,
    done: bool,
}

impl SampleProvider for MemoryTrackOutput {
    fn next_sample(&mut self) -> Option<Sample> {
        if self.done || !self.cell.is_reading() {
            self.done = true;
            return None;
        }
        if let Some(limit) = self.fail_after {
            if self.read.load(Ordering::Acquire) >= limit {
                self.cell
                    .fail(format!("injected read failure after {limit} samples"));
                self.done = true;
                return None;
            }
        }
        match self.samples.next() {
            Some(sample) => {
                self.read.fetch_add(1, Ordering::AcqRel);
                Some(sample)
            }
            None => {
                self.done = true;
                self.cell.output_exhausted();
                None
            }
        }
    }
}

/// One written track.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContainerTrack {
    pub spec: InputSpec,
    pub samples: Vec<Sample>,
}

/// What a [`MemoryWriter`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContainer {
    pub kind: ContainerKind,
    pub session_start: Option<MediaTime>,
    pub tracks: Vec<MemoryContainerTrack>,
}

impl MemoryContainer {
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks_of(&self, kind: MediaKind) -> usize {
        self.tracks.iter().filter(|t| t.spec.kind == kind).count()
    }

    /// Latest sample end across all tracks, from the session start.
    pub fn duration(&self) -> MediaTime {
        let start = self.session_start.unwrap_or(MediaTime::ZERO);
        let end = self
            .tracks
            .iter()
            .flat_map(|t| t.samples.iter().map(Sample::end))
            .max()
            .unwrap_or(start);
        let secs = end.seconds_since(start).max(0.0);
        MediaTime::from_seconds(secs, DEFAULT_TIMESCALE)
    }

    /// Read the written container back as a source asset.
    pub fn to_asset(&self) -> MemoryAsset {
        let tracks = self
            .tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                let info = TrackInfo {
                    id: index as u32 + 1,
                    kind: track.spec.kind,
                    label: Some(track.spec.label.clone()),
                };
                MemoryTrack::new(info, track.samples.clone())
            })
            .collect();
        MemoryAsset::new(tracks)
    }
}

/// In-memory [`ContainerWriter`].
///
/// Each input is drained by its own task once writing starts, so
/// `start_writing` must run inside a tokio runtime.
pub struct MemoryWriter {
    kind: ContainerKind,
    container: Arc<Mutex<MemoryContainer>>,
    cell: WriterCell,
    inputs: Vec<WriterInput>,
    pending: Vec<(usize, InputDrain)>,
    drains: Vec<tokio::task::JoinHandle<()>>,
    fail_start: bool,
    finish_failure: Option<String>,
    reject_after: Option<usize>,
    stalled: bool,
}

impl MemoryWriter {
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            container: Arc::new(Mutex::new(MemoryContainer {
                kind,
                session_start: None,
                tracks: Vec::new(),
            })),
            cell: WriterCell::new(),
            inputs: Vec::new(),
            pending: Vec::new(),
            drains: Vec::new(),
            fail_start: false,
            finish_failure: None,
            reject_after: None,
            stalled: false,
        }
    }

    /// Refuse to start writing.
    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail while finishing, after every input has been drained.
    pub fn with_finish_failure(mut self, message: impl Into<String>) -> Self {
        self.finish_failure = Some(message.into());
        self
    }

    /// Fail and stop draining an input after it has taken `samples` samples.
    pub fn with_rejection_after(mut self, samples: usize) -> Self {
        self.reject_after = Some(samples);
        self
    }

    /// Never drain inputs; pipes park once their queues fill.
    pub fn with_stalled_inputs(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Inputs handed out so far.
    pub fn inputs(&self) -> &[WriterInput] {
        &self.inputs
    }

    /// Snapshot of the written container.
    pub fn container(&self) -> MemoryContainer {
        match self.container.lock() {
            Ok(container) => container.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ContainerWriter for MemoryWriter {
    fn kind(&self) -> ContainerKind {
        self.kind
    }

    fn add_input(&mut self, spec: InputSpec, capacity: usize) -> MuxResult<WriterInput> {
        if self.cell.status() != WriterStatus::Unknown {
            return Err(MuxError::configuration(
                "inputs must be added before writing starts",
            ));
        }
        let (input, drain) = input_port(spec.clone(), capacity);
        let index = {
            let mut container = self
                .container
                .lock()
                .map_err(|_| MuxError::writer("container lock poisoned"))?;
            container.tracks.push(MemoryContainerTrack {
                spec,
                samples: Vec::new(),
            });
            container.tracks.len() - 1
        };
        self.inputs.push(input.clone());
        self.pending.push((index, drain));
        Ok(input)
    }

    fn start_writing(&mut self) -> bool {
        if self.fail_start {
            self.cell.fail("writer refused to start");
            return false;
        }
        if !self.cell.start() {
            return false;
        }
        if self.stalled {
            return true;
        }

        for (index, mut drain) in self.pending.drain(..) {
            let container = self.container.clone();
            let cell = self.cell.clone();
            let reject_after = self.reject_after;
            self.drains.push(tokio::spawn(async move {
                let mut taken = 0usize;
                while let Some(sample) = drain.next().await {
                    if let Ok(mut container) = container.lock() {
                        container.tracks[index].samples.push(sample);
                    }
                    taken += 1;
                    if reject_after.is_some_and(|limit| taken >= limit) {
                        cell.fail(format!(
                            "input '{}' rejected samples after {taken}",
                            drain.spec().label
                        ));
                        break;
                    }
                }
            }));
        }
        true
    }

    fn start_session(&mut self, at: MediaTime) {
        if let Ok(mut container) = self.container.lock() {
            container.session_start = Some(at);
        }
    }

    async fn finish_writing(&mut self) {
        if self.cell.status() != WriterStatus::Writing {
            return;
        }
        self.pending.clear();
        for handle in self.drains.drain(..) {
            if let Err(e) = handle.await {
                self.cell.fail(format!("drain task failed: {e}"));
            }
        }
        match self.finish_failure.take() {
            Some(message) => self.cell.fail(message),
            None => self.cell.complete(),
        }
    }

    fn cancel_writing(&mut self) {
        for handle in self.drains.drain(..) {
            handle.abort();
        }
        self.pending.clear();
        self.cell.cancel();
    }

    fn status(&self) -> WriterStatus {
        self.cell.status()
    }

    fn error(&self) -> Option<MuxError> {
        self.cell.error()
    }
}
