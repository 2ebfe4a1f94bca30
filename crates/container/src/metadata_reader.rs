//! Reads timed metadata tracks back out of an asset.

use trackmux_common::{MuxError, MuxResult};
use trackmux_media_model::{MediaKind, MetadataGroup};
use trackmux_pipeline::{AssetReader, ReaderStatus};

/// Every metadata track's groups, one inner list per track, in track order.
///
/// Starts the reader; it must not have been started yet.
pub fn read_timed_metadata(reader: &mut dyn AssetReader) -> MuxResult<Vec<Vec<MetadataGroup>>> {
    let tracks: Vec<_> = reader
        .tracks()
        .into_iter()
        .filter(|t| t.kind == MediaKind::Metadata)
        .collect();

    let mut outputs = Vec::with_capacity(tracks.len());
    for track in &tracks {
        outputs.push(reader.track_output(track.id)?);
    }
    if !reader.start_reading() {
        return Err(reader
            .error()
            .unwrap_or_else(|| MuxError::reader("could not start reading metadata")));
    }

    let mut result = Vec::with_capacity(outputs.len());
    for (track, mut output) in tracks.iter().zip(outputs) {
        let mut groups = Vec::new();
        while let Some(sample) = output.next_sample() {
            groups.push(MetadataGroup::from_sample(&sample)?);
        }
        tracing::debug!(track = track.id, groups = groups.len(), "Read metadata track");
        result.push(groups);
    }

    if reader.status() == ReaderStatus::Failed {
        return Err(reader.error().unwrap_or(MuxError::Unknown));
    }
    Ok(result)
}
