//! Export a source bundle.

use std::path::{Path, PathBuf};

use trackmux_common::AppConfig;
use trackmux_container::{BundleReader, BundleWriter};
use trackmux_media_model::{Image, MetadataGroup, TimeRange};
use trackmux_pipeline::{ExportConfig, ExportRequest, Exporter, ImageTrack};

pub struct ExportOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub container: Option<String>,
    pub metadata: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
    pub ranges: Vec<String>,
    pub keep_source_video: bool,
    pub timeout: Option<f64>,
    pub workers: Option<usize>,
    pub capacity: Option<usize>,
}

pub fn run(app: &AppConfig, options: ExportOptions) -> anyhow::Result<()> {
    println!("Exporting bundle at: {}", options.input.display());

    let mut defaults = app.export.clone();
    if let Some(container) = options.container {
        defaults.container = container;
    }
    if let Some(timeout) = options.timeout {
        defaults.completion_timeout_secs = Some(timeout);
    }
    if let Some(workers) = options.workers {
        defaults.worker_threads = Some(workers);
    }
    if let Some(capacity) = options.capacity {
        defaults.input_capacity = capacity;
    }

    let output = options
        .output
        .unwrap_or_else(|| default_output(&app.exports_dir, &options.input));
    let config = ExportConfig::from_defaults(&output, &defaults)
        .map_err(|e| anyhow::anyhow!("Invalid export settings: {e}"))?;

    let mut request = ExportRequest::default();
    for path in &options.metadata {
        request = request.with_metadata(load_metadata(path)?);
    }
    if !options.images.is_empty() {
        let mut track = load_image_track(&options.images, &options.ranges)?;
        track.keep_source_video = options.keep_source_video;
        request = request.with_image_track(track);
    }

    println!("  Output: {}", output.display());
    println!("  Container: {}", config.container);
    println!("  Metadata tracks: {}", request.timed_metadata.len());
    if let Some(track) = &request.image_track {
        println!("  Image frames: {}", track.images.len());
    }

    let mut reader = BundleReader::open(&options.input)
        .map_err(|e| anyhow::anyhow!("Failed to open source bundle: {e}"))?;
    let mut writer = BundleWriter::new(&output, config.container);
    let exporter = Exporter::new(config);

    let state = exporter
        .export_blocking(&mut reader, &mut writer, request)
        .map_err(|e| anyhow::anyhow!("Failed to run export: {e}"))?;
    let progress = exporter.progress();

    match state.error() {
        Some(error) => {
            println!("Export failed: {error}");
            Err(anyhow::anyhow!("export ended in state '{}'", state.name()))
        }
        None => {
            println!(
                "Export {}: {} tracks, {} units -> {}",
                state.name(),
                progress.pipes_total,
                progress.units_delivered,
                output.display()
            );
            Ok(())
        }
    }
}

fn default_output(exports_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    exports_dir.join(format!("{stem}-export"))
}

fn load_metadata(path: &Path) -> anyhow::Result<Vec<MetadataGroup>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let groups: Vec<MetadataGroup> = serde_json::from_str(&json)
        .map_err(|e| anyhow::anyhow!("Invalid metadata file {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), groups = groups.len(), "Loaded metadata groups");
    Ok(groups)
}

fn load_image_track(images: &[PathBuf], ranges: &[String]) -> anyhow::Result<ImageTrack> {
    if images.len() != ranges.len() {
        anyhow::bail!(
            "Each --image needs a matching --range ({} images, {} ranges)",
            images.len(),
            ranges.len()
        );
    }
    let images = images
        .iter()
        .map(|path| {
            Image::open(path).map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let ranges = ranges
        .iter()
        .map(|range| parse_range(range))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(ImageTrack::new(images, ranges))
}

/// Parse `START:DURATION` in seconds.
fn parse_range(value: &str) -> anyhow::Result<TimeRange> {
    let (start, duration) = value
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid range '{value}', expected START:DURATION"))?;
    let start: f64 = start
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid range start '{start}': {e}"))?;
    let duration: f64 = duration
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid range duration '{duration}': {e}"))?;
    if start < 0.0 || duration <= 0.0 {
        anyhow::bail!("Range '{value}' must start at or after 0 and have a positive duration");
    }
    Ok(TimeRange::from_seconds(start, duration))
}
