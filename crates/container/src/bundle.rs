//! On-disk track bundle.
//!
//! A bundle is a directory holding `manifest.json` and one JSONL file per
//! track under `tracks/`, one serialized [`Sample`] per line. It stores
//! payload bytes verbatim and never interprets them.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trackmux_common::{MuxError, MuxResult};
use trackmux_media_model::{MediaKind, MediaTime, Sample};
use trackmux_pipeline::{
    input_port, AssetReader, ContainerKind, ContainerWriter, FormatHint, InputDrain, InputSpec,
    ReaderStatus, SampleProvider, TrackInfo, WriterInput, WriterStatus,
};

use crate::memory::{MemoryTrack, SyntheticSource};
use crate::status::{ReaderCell, WriterCell};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TRACKS_DIR: &str = "tracks";
pub const BUNDLE_VERSION: &str = "1.0";

/// Bundle manifest (`manifest.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Schema version.
    pub version: String,

    /// Container kind the bundle was exported for.
    pub container: ContainerKind,

    /// Creation timestamp (RFC 3339).
    pub created_at: String,

    pub session_start: MediaTime,

    /// Latest track end, in seconds from the session start.
    pub duration_secs: f64,

    pub tracks: Vec<BundleTrack>,
}

/// One track entry in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleTrack {
    pub id: u32,
    pub kind: MediaKind,
    pub label: String,
    pub format: FormatHint,

    /// Path of the track's JSONL file, relative to the bundle root.
    pub file: String,

    pub sample_count: u64,
    pub duration_secs: f64,
}

impl BundleManifest {
    pub fn new(container: ContainerKind, session_start: MediaTime) -> Self {
        Self {
            version: BUNDLE_VERSION.to_string(),
            container,
            created_at: chrono::Utc::now().to_rfc3339(),
            session_start,
            duration_secs: 0.0,
            tracks: Vec::new(),
        }
    }

    pub fn load(root: impl AsRef<Path>) -> MuxResult<Self> {
        let path = root.as_ref().join(MANIFEST_FILE);
        if !path.exists() {
            return Err(MuxError::FileNotFound { path });
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, root: impl AsRef<Path>) -> MuxResult<()> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(root.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    pub fn push_track(&mut self, track: BundleTrack) {
        self.duration_secs = self.duration_secs.max(track.duration_secs);
        self.tracks.push(track);
    }
}

/// Relative path of the `index`-th track file, e.g. `tracks/01-audio.jsonl`.
pub fn track_file_name(index: usize, kind: MediaKind) -> String {
    format!("{TRACKS_DIR}/{:02}-{kind}.jsonl", index + 1)
}

/// Appends samples to one track file as JSONL.
pub struct TrackFileWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    samples_written: u64,
    end: Option<MediaTime>,
}

impl TrackFileWriter {
    pub fn create(path: PathBuf) -> MuxResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            samples_written: 0,
            end: None,
        })
    }

    pub fn write_sample(&mut self, sample: &Sample) -> MuxResult<()> {
        let json = serde_json::to_string(sample)?;
        writeln!(self.writer, "{json}").map_err(|e| {
            MuxError::writer(format!("Failed to write {}: {e}", self.path.display()))
        })?;
        self.samples_written += 1;
        let end = sample.end();
        self.end = Some(self.end.map_or(end, |current| current.max(end)));

        if self.samples_written % 1000 == 0 {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> MuxResult<()> {
        self.writer.flush().map_err(|e| {
            MuxError::writer(format!("Failed to flush {}: {e}", self.path.display()))
        })
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Latest sample end written so far.
    pub fn end(&self) -> Option<MediaTime> {
        self.end
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TrackFileWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

struct TrackSummary {
    samples: u64,
    end: Option<MediaTime>,
}

/// [`ContainerWriter`] producing a bundle directory.
///
/// The on-disk layout is the same for every container kind; the kind is
/// recorded in the manifest. Drain tasks are spawned by `start_writing`,
/// which must run inside a tokio runtime.
pub struct BundleWriter {
    root: PathBuf,
    kind: ContainerKind,
    cell: WriterCell,
    specs: Vec<InputSpec>,
    pending: Vec<InputDrain>,
    drains: Vec<tokio::task::JoinHandle<MuxResult<TrackSummary>>>,
    session_start: MediaTime,
}

impl BundleWriter {
    pub fn new(root: impl Into<PathBuf>, kind: ContainerKind) -> Self {
        Self {
            root: root.into(),
            kind,
            cell: WriterCell::new(),
            specs: Vec::new(),
            pending: Vec::new(),
            drains: Vec::new(),
            session_start: MediaTime::ZERO,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest(&self, summaries: &[TrackSummary]) -> BundleManifest {
        let mut manifest = BundleManifest::new(self.kind, self.session_start);
        for (index, (spec, summary)) in self.specs.iter().zip(summaries).enumerate() {
            let duration_secs = summary
                .end
                .map(|end| end.seconds_since(self.session_start).max(0.0))
                .unwrap_or(0.0);
            manifest.push_track(BundleTrack {
                id: index as u32 + 1,
                kind: spec.kind,
                label: spec.label.clone(),
                format: spec.format.clone(),
                file: track_file_name(index, spec.kind),
                sample_count: summary.samples,
                duration_secs,
            });
        }
        manifest
    }
}

#[async_trait]
impl ContainerWriter for BundleWriter {
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
        self.specs.push(spec);
        self.pending.push(drain);
        Ok(input)
    }

    fn start_writing(&mut self) -> bool {
        let mut files = Vec::with_capacity(self.specs.len());
        for (index, spec) in self.specs.iter().enumerate() {
            let path = self.root.join(track_file_name(index, spec.kind));
            match TrackFileWriter::create(path) {
                Ok(file) => files.push(file),
                Err(e) => {
                    self.cell.fail(format!("Failed to create track file: {e}"));
                    return false;
                }
            }
        }
        if !self.cell.start() {
            return false;
        }
        tracing::debug!(root = %self.root.display(), tracks = files.len(), "Bundle writer started");

        for (mut drain, mut file) in self.pending.drain(..).zip(files) {
            let cell = self.cell.clone();
            // Track files are written with blocking std::fs calls.
            self.drains.push(tokio::task::spawn_blocking(move || {
                while let Some(sample) = drain.blocking_next() {
                    if cell.status() == WriterStatus::Cancelled {
                        break;
                    }
                    if let Err(e) = file.write_sample(&sample) {
                        cell.fail(e.to_string());
                        return Err(e);
                    }
                }
                file.flush()?;
                Ok::<_, MuxError>(TrackSummary {
                    samples: file.samples_written(),
                    end: file.end(),
                })
            }));
        }
        true
    }

    fn start_session(&mut self, at: MediaTime) {
        self.session_start = at;
    }

    async fn finish_writing(&mut self) {
        if self.cell.status() != WriterStatus::Writing {
            return;
        }

        let mut summaries = Vec::with_capacity(self.drains.len());
        for handle in self.drains.drain(..) {
            match handle.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(e)) => self.cell.fail(e.to_string()),
                Err(e) => self.cell.fail(format!("track drain task failed: {e}")),
            }
        }
        if self.cell.status() != WriterStatus::Writing {
            return;
        }

        let manifest = self.manifest(&summaries);
        match manifest.save(&self.root) {
            Ok(()) => {
                tracing::info!(
                    root = %self.root.display(),
                    tracks = manifest.tracks.len(),
                    duration_secs = manifest.duration_secs,
                    "Bundle written"
                );
                self.cell.complete();
            }
            Err(e) => self.cell.fail(format!("Failed to write manifest: {e}")),
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

/// [`AssetReader`] over a bundle directory. Track files are streamed
/// line by line; a malformed line fails the reader.
pub struct BundleReader {
    root: PathBuf,
    manifest: BundleManifest,
    cell: ReaderCell,
}

impl BundleReader {
    pub fn open(root: impl Into<PathBuf>) -> MuxResult<Self> {
        let root = root.into();
        let manifest = BundleManifest::load(&root)?;
        Ok(Self {
            root,
            manifest,
            cell: ReaderCell::new(),
        })
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetReader for BundleReader {
    fn tracks(&self) -> Vec<TrackInfo> {
        self.manifest
            .tracks
            .iter()
            .map(|t| TrackInfo {
                id: t.id,
                kind: t.kind,
                label: Some(t.label.clone()),
            })
            .collect()
    }

    fn track_output(&mut self, track_id: u32) -> MuxResult<Box<dyn SampleProvider>> {
        if self.cell.status() != ReaderStatus::Unknown {
            return Err(MuxError::configuration(
                "track outputs must be requested before reading starts",
            ));
        }
        let track = self
            .manifest
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .ok_or_else(|| MuxError::configuration(format!("no track with id {track_id}")))?;

        let path = self.root.join(&track.file);
        if !path.exists() {
            return Err(MuxError::FileNotFound { path });
        }
        let file = File::open(&path)?;
        self.cell.output_opened();
        Ok(Box::new(BundleTrackOutput {
            lines: BufReader::new(file).lines(),
            path,
            line: 0,
            cell: self.cell.clone(),
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

struct BundleTrackOutput {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
    line: usize,
    cell: ReaderCell,
    done: bool,
}

impl BundleTrackOutput {
    fn fail(&mut self, message: String) -> Option<Sample> {
        self.cell.fail(format!(
            "{}:{}: {message}",
            self.path.display(),
            self.line
        ));
        self.done = true;
        None
    }
}

impl SampleProvider for BundleTrackOutput {
    fn next_sample(&mut self) -> Option<Sample> {
        loop {
            if self.done || !self.cell.is_reading() {
                self.done = true;
                return None;
            }
            self.line += 1;
            match self.lines.next() {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => {
                    return match serde_json::from_str::<Sample>(&line) {
                        Ok(sample) => Some(sample),
                        Err(e) => self.fail(e.to_string()),
                    }
                }
                Some(Err(e)) => return self.fail(e.to_string()),
                None => {
                    self.done = true;
                    self.cell.output_exhausted();
                    return None;
                }
            }
        }
    }
}

/// Write in-memory tracks straight to a bundle, without an export session.
pub fn write_bundle(
    root: impl AsRef<Path>,
    container: ContainerKind,
    tracks: &[MemoryTrack],
) -> MuxResult<BundleManifest> {
    let root = root.as_ref();
    let mut manifest = BundleManifest::new(container, MediaTime::ZERO);

    for (index, track) in tracks.iter().enumerate() {
        let file_name = track_file_name(index, track.info.kind);
        let mut writer = TrackFileWriter::create(root.join(&file_name))?;
        for sample in &track.samples {
            writer.write_sample(sample)?;
        }
        writer.flush()?;

        manifest.push_track(BundleTrack {
            id: track.info.id,
            kind: track.info.kind,
            label: track.info.display_label(),
            format: FormatHint::Passthrough {
                source_track: Some(track.info.id),
            },
            file: file_name,
            sample_count: writer.samples_written(),
            duration_secs: track.duration().seconds(),
        });
    }

    manifest.save(root)?;
    Ok(manifest)
}

/// Write a synthetic source bundle.
pub fn synthesize_bundle(
    root: impl AsRef<Path>,
    source: &SyntheticSource,
) -> MuxResult<BundleManifest> {
    let root = root.as_ref();
    tracing::info!(
        root = %root.display(),
        duration_secs = source.duration_secs,
        audio = source.audio,
        video = source.video,
        "Synthesizing source bundle"
    );
    write_bundle(root, ContainerKind::Bundle, &source.tracks())
}
