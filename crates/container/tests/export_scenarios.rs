use std::time::Duration;

use trackmux_common::{IoSide, MuxError, MuxResult};
use trackmux_container::{
    read_timed_metadata, synthesize_bundle, BundleReader, BundleWriter, MemoryAsset, MemoryTrack,
    MemoryWriter, SyntheticSource,
};
use trackmux_media_model::{Image, MediaKind, MediaTime, MetadataGroup, Sample, TimeRange};
use trackmux_pipeline::{
    AssetReader, ContainerKind, ContainerWriter, ExportConfig, ExportRequest, Exporter, ImageTrack,
    ReaderStatus, SampleProvider, SessionState, TrackInfo, WriterStatus,
};

fn exporter(name: &str) -> Exporter {
    Exporter::new(
        ExportConfig::new(std::env::temp_dir().join(name), ContainerKind::Mov)
            .with_input_capacity(4),
    )
}

fn source(duration_secs: f64, audio: bool, video: bool) -> MemoryAsset {
    MemoryAsset::new(
        SyntheticSource {
            duration_secs,
            audio,
            video,
        }
        .tracks(),
    )
}

fn captions(words: &[&str]) -> Vec<MetadataGroup> {
    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            MetadataGroup::from_strings(
                &[*word, "caption"],
                TimeRange::from_seconds(i as f64, 1.0),
                "com.trackmux.Caption",
            )
        })
        .collect()
}

fn image_track(frames: usize) -> ImageTrack {
    ImageTrack::new(
        (0..frames)
            .map(|i| Image::solid(8, 6, [i as u8 * 40, 0, 0, 255]))
            .collect(),
        (0..frames)
            .map(|i| TimeRange::from_seconds(i as f64 * 0.5, 0.5))
            .collect(),
    )
}

#[tokio::test]
async fn test_audio_only_round_trip_keeps_duration() {
    let exporter = exporter("trackmux_audio_only.mov");
    let mut reader = source(3.0, true, false);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);

    let state = exporter
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    assert_eq!(state, SessionState::Finished);
    let container = writer.container();
    assert_eq!(container.track_count(), 1);
    assert_eq!(container.session_start, Some(MediaTime::ZERO));
    assert_eq!(container.duration(), MediaTime::from_seconds(3.0, 600));
}

#[tokio::test]
async fn test_audio_video_round_trip_keeps_every_sample() {
    let tracks = SyntheticSource {
        duration_secs: 2.5,
        audio: true,
        video: true,
    }
    .tracks();
    let exporter = exporter("trackmux_av.mov");
    let mut reader = MemoryAsset::new(tracks.clone());
    let mut writer = MemoryWriter::new(ContainerKind::Mov);

    let state = exporter
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    assert_eq!(state, SessionState::Finished);
    let container = writer.container();
    assert_eq!(container.track_count(), 2);
    assert_eq!(container.duration(), MediaTime::from_seconds(2.5, 600));
    for (written, original) in container.tracks.iter().zip(&tracks) {
        assert_eq!(written.spec.kind, original.info.kind);
        assert_eq!(written.samples, original.samples);
    }
    assert_eq!(exporter.progress().pipes_finished, 2);
}

#[tokio::test]
async fn test_one_metadata_list_adds_one_track() {
    let mut reader = source(2.0, true, true);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);
    let request = ExportRequest::default().with_metadata(captions(&["a", "b"]));

    let state = exporter("trackmux_meta1.mov")
        .export(&mut reader, &mut writer, request)
        .await;

    assert_eq!(state, SessionState::Finished);
    assert_eq!(writer.container().track_count(), 3);
}

#[tokio::test]
async fn test_two_metadata_lists_add_two_tracks() {
    let mut reader = source(2.0, true, true);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);
    let request = ExportRequest::default()
        .with_metadata(captions(&["a", "b"]))
        .with_metadata(captions(&["c"]))
        .with_metadata(Vec::new());

    let state = exporter("trackmux_meta2.mov")
        .export(&mut reader, &mut writer, request)
        .await;

    assert_eq!(state, SessionState::Finished);
    let container = writer.container();
    assert_eq!(container.track_count(), 4);
    assert_eq!(container.tracks_of(MediaKind::Metadata), 2);
}

#[tokio::test]
async fn test_image_track_replaces_source_video() {
    let mut reader = source(2.0, true, true);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);
    let request = ExportRequest::default()
        .with_metadata(captions(&["a"]))
        .with_image_track(image_track(3));

    let state = exporter("trackmux_image.mov")
        .export(&mut reader, &mut writer, request)
        .await;

    assert_eq!(state, SessionState::Finished);
    let container = writer.container();
    assert_eq!(container.track_count(), 3);
    assert_eq!(container.tracks_of(MediaKind::Video), 1);

    let image = container
        .tracks
        .iter()
        .find(|t| t.spec.label == "image")
        .unwrap();
    let times: Vec<f64> = image.samples.iter().map(|s| s.pts.seconds()).collect();
    assert_eq!(times, vec![0.0, 0.5, 1.0]);
    assert!(image.samples.iter().all(|s| s.payload.len() == 8 * 6 * 4));
}

#[tokio::test]
async fn test_image_track_can_keep_source_video() {
    let mut reader = source(1.0, true, true);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);
    let mut track = image_track(2);
    track.keep_source_video = true;

    let state = exporter("trackmux_keep_video.mov")
        .export(
            &mut reader,
            &mut writer,
            ExportRequest::default().with_image_track(track),
        )
        .await;

    assert_eq!(state, SessionState::Finished);
    assert_eq!(writer.container().tracks_of(MediaKind::Video), 2);
}

#[tokio::test]
async fn test_unusable_first_image_fails_setup() {
    let mut reader = source(1.0, true, false);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);
    let request = ExportRequest::default().with_image_track(ImageTrack::new(
        vec![Image::new(4, 4, vec![0; 3])],
        vec![TimeRange::from_seconds(0.0, 1.0)],
    ));

    let state = exporter("trackmux_bad_image.mov")
        .export(&mut reader, &mut writer, request)
        .await;

    assert!(matches!(
        state.error(),
        Some(MuxError::Configuration { .. })
    ));
    assert!(writer.inputs().iter().all(|i| i.wake_registrations() == 0));
}

#[tokio::test]
async fn test_writer_start_failure_launches_no_pipes() {
    let exporter = exporter("trackmux_start_failure.mov");
    let mut reader = source(1.0, true, true);
    let mut writer = MemoryWriter::new(ContainerKind::Mov).with_start_failure();

    let state = exporter
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    assert!(matches!(state.error(), Some(MuxError::StartFailed { .. })));
    assert_eq!(writer.inputs().len(), 2);
    assert!(writer.inputs().iter().all(|i| i.wake_registrations() == 0));
    assert_eq!(reader.samples_read(), 0);
    assert_eq!(exporter.progress().pipes_total, 0);
}

#[tokio::test]
async fn test_empty_pipe_and_long_pipe_both_complete() {
    let mut reader = MemoryAsset::new(vec![
        MemoryTrack::new(TrackInfo::new(1, MediaKind::Audio), Vec::new()),
        MemoryTrack::synthetic(2, MediaKind::Video, 0.1, 10.0),
    ]);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);
    let exporter = Exporter::new(
        ExportConfig::new(
            std::env::temp_dir().join("trackmux_empty_long.mov"),
            ContainerKind::Mov,
        )
        .with_input_capacity(1),
    );

    let state = exporter
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    assert_eq!(state, SessionState::Finished);
    let container = writer.container();
    assert_eq!(container.tracks[0].samples.len(), 0);
    assert_eq!(container.tracks[1].samples.len(), 100);
    let progress = exporter.progress();
    assert_eq!(progress.pipes_finished, 2);
    assert_eq!(progress.units_delivered, 100);
}

#[tokio::test]
async fn test_cancel_while_parked_resolves_cancelled() {
    let exporter = exporter("trackmux_cancel.mov");
    let mut reader = source(5.0, true, true);
    let mut writer = MemoryWriter::new(ContainerKind::Mov).with_stalled_inputs();
    let mut states = exporter.subscribe();

    let (state, _) = tokio::join!(
        exporter.export(&mut reader, &mut writer, ExportRequest::default()),
        async {
            states
                .wait_for(|s| *s == SessionState::Exporting)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            exporter.cancel();
        }
    );

    assert_eq!(state, SessionState::Cancelled);
    assert!(writer.inputs().iter().all(|i| i.is_finished()));
}

#[tokio::test]
async fn test_stalled_writer_times_out() {
    let exporter = Exporter::new(
        ExportConfig::new(
            std::env::temp_dir().join("trackmux_timeout.mov"),
            ContainerKind::Mov,
        )
        .with_completion_timeout(Duration::from_millis(100)),
    );
    let mut reader = source(5.0, true, false);
    let mut writer = MemoryWriter::new(ContainerKind::Mov).with_stalled_inputs();

    let state = exporter
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    assert!(matches!(
        state.error(),
        Some(MuxError::CompletionTimeout { waited_ms: 100 })
    ));
    assert!(exporter.cancellation_token().is_cancelled());
}

/// Source whose first track's output panics after a few samples.
struct PanickingAsset {
    inner: MemoryAsset,
    panic_after: usize,
}

struct PanicAfter {
    inner: Box<dyn SampleProvider>,
    remaining: usize,
}

impl SampleProvider for PanicAfter {
    fn next_sample(&mut self) -> Option<Sample> {
        if self.remaining == 0 {
            panic!("source track vanished");
        }
        self.remaining -= 1;
        self.inner.next_sample()
    }
}

impl AssetReader for PanickingAsset {
    fn tracks(&self) -> Vec<TrackInfo> {
        self.inner.tracks()
    }

    fn track_output(&mut self, track_id: u32) -> MuxResult<Box<dyn SampleProvider>> {
        let output = self.inner.track_output(track_id)?;
        if track_id == 1 {
            return Ok(Box::new(PanicAfter {
                inner: output,
                remaining: self.panic_after,
            }));
        }
        Ok(output)
    }

    fn start_reading(&mut self) -> bool {
        self.inner.start_reading()
    }

    fn status(&self) -> ReaderStatus {
        self.inner.status()
    }

    fn error(&self) -> Option<MuxError> {
        self.inner.error()
    }

    fn cancel_reading(&mut self) {
        self.inner.cancel_reading()
    }
}

#[tokio::test]
async fn test_panicking_pipe_fails_session_without_hanging() {
    let exporter = Exporter::new(
        ExportConfig::new(
            std::env::temp_dir().join("trackmux_pipe_panic.mov"),
            ContainerKind::Mov,
        )
        .with_input_capacity(4)
        .with_completion_timeout(Duration::from_secs(1)),
    );
    let mut reader = PanickingAsset {
        inner: source(2.0, true, true),
        panic_after: 3,
    };
    let mut writer = MemoryWriter::new(ContainerKind::Mov);

    let state = tokio::time::timeout(
        Duration::from_secs(5),
        exporter.export(&mut reader, &mut writer, ExportRequest::default()),
    )
    .await
    .expect("export should end after a pipe panics");

    assert_eq!(state.error().map(MuxError::kind), Some("unknown"));
    assert_eq!(exporter.state(), state);
    assert_eq!(writer.status(), WriterStatus::Cancelled);
    assert!(writer.inputs().iter().all(|i| i.is_finished()));
    assert!(exporter.cancellation_token().is_cancelled());
}

#[tokio::test]
async fn test_reader_failure_mid_stream_fails_session() {
    let mut reader = source(2.0, true, true).with_failure_after(10);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);

    let state = exporter("trackmux_reader_failure.mov")
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    assert!(matches!(
        state.error(),
        Some(MuxError::UnderlyingIo {
            side: IoSide::Reader,
            ..
        })
    ));
}

#[tokio::test]
async fn test_writer_finish_failure_fails_session() {
    let mut reader = source(1.0, true, false);
    let mut writer = MemoryWriter::new(ContainerKind::Mov).with_finish_failure("disk full");

    let state = exporter("trackmux_finish_failure.mov")
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    let error = state.error().unwrap();
    assert!(matches!(
        error,
        MuxError::UnderlyingIo {
            side: IoSide::Writer,
            ..
        }
    ));
    assert!(error.to_string().contains("disk full"));
}

#[tokio::test]
async fn test_writer_rejection_fails_session() {
    let mut reader = source(2.0, true, false);
    let mut writer = MemoryWriter::new(ContainerKind::Mov).with_rejection_after(5);

    let state = exporter("trackmux_rejection.mov")
        .export(&mut reader, &mut writer, ExportRequest::default())
        .await;

    assert!(matches!(
        state.error(),
        Some(MuxError::UnderlyingIo {
            side: IoSide::Writer,
            ..
        })
    ));
    assert!(writer.container().tracks[0].samples.len() >= 5);
}

#[tokio::test]
async fn test_metadata_reads_back_unchanged() {
    let first = captions(&["hello", "world", "again"]);
    let second = vec![MetadataGroup::from_image_bytes(
        vec![0x89, b'P', b'N', b'G', 1, 2, 3],
        TimeRange::from_seconds(0.0, 2.0),
        "com.trackmux.Image",
    )];
    let mut reader = source(3.0, true, false);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);
    let request = ExportRequest::default()
        .with_metadata(first.clone())
        .with_metadata(second.clone());

    let state = exporter("trackmux_metadata.mov")
        .export(&mut reader, &mut writer, request)
        .await;
    assert_eq!(state, SessionState::Finished);

    let mut asset = writer.container().to_asset();
    let read = read_timed_metadata(&mut asset).unwrap();
    assert_eq!(read, vec![first, second]);
}

#[tokio::test]
async fn test_bundle_export_round_trip() {
    let root = std::env::temp_dir().join("trackmux_test_bundle_export");
    let _ = std::fs::remove_dir_all(&root);
    let input_dir = root.join("input");
    let output_dir = root.join("output");

    let synthesized = synthesize_bundle(
        &input_dir,
        &SyntheticSource {
            duration_secs: 1.5,
            audio: true,
            video: true,
        },
    )
    .unwrap();
    let groups = captions(&["x", "y"]);

    let exporter = Exporter::new(ExportConfig::new(&output_dir, ContainerKind::Bundle));
    let mut reader = BundleReader::open(&input_dir).unwrap();
    let mut writer = BundleWriter::new(&output_dir, ContainerKind::Bundle);
    let state = exporter
        .export(
            &mut reader,
            &mut writer,
            ExportRequest::default().with_metadata(groups.clone()),
        )
        .await;
    assert_eq!(state, SessionState::Finished);

    let mut exported = BundleReader::open(&output_dir).unwrap();
    let manifest = exported.manifest().clone();
    assert_eq!(manifest.container, ContainerKind::Bundle);
    assert_eq!(manifest.tracks.len(), 3);
    assert_eq!(manifest.tracks[0].sample_count, synthesized.tracks[0].sample_count);
    assert_eq!(manifest.tracks[1].sample_count, synthesized.tracks[1].sample_count);
    assert!((manifest.tracks[0].duration_secs - 1.5).abs() < 1e-9);
    assert!((manifest.tracks[1].duration_secs - 1.5).abs() < 1e-9);
    // Two one-second captions outlast the source.
    assert!((manifest.duration_secs - 2.0).abs() < 1e-9);
    assert_eq!(exported.tracks()[2].kind, MediaKind::Metadata);

    assert_eq!(read_timed_metadata(&mut exported).unwrap(), vec![groups]);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn test_export_blocking_runs_on_own_runtime() {
    let exporter = Exporter::new(
        ExportConfig::new(
            std::env::temp_dir().join("trackmux_blocking.mov"),
            ContainerKind::Mov,
        )
        .with_worker_threads(2),
    );
    let mut reader = source(1.0, true, true);
    let mut writer = MemoryWriter::new(ContainerKind::Mov);

    let state = exporter
        .export_blocking(&mut reader, &mut writer, ExportRequest::default())
        .unwrap();

    assert_eq!(state, SessionState::Finished);
    assert_eq!(writer.container().track_count(), 2);
}
