//! The asset reader collaborator.

use serde::{Deserialize, Serialize};
use trackmux_common::{MuxError, MuxResult};
use trackmux_media_model::MediaKind;

use crate::provider::SampleProvider;

/// One track of a source asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: u32,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TrackInfo {
    pub fn new(id: u32, kind: MediaKind) -> Self {
        Self {
            id,
            kind,
            label: None,
        }
    }

    /// Label used for the pipe and writer input, e.g. `audio-1`.
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.kind, self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderStatus {
    Unknown,
    Reading,
    Completed,
    Failed,
    Cancelled,
}

/// Source of raw sample tracks.
///
/// Outputs are requested before [`AssetReader::start_reading`]; a reader
/// that fails mid-stream ends its outputs early and reports the failure
/// through [`AssetReader::status`] and [`AssetReader::error`].
pub trait AssetReader: Send {
    fn tracks(&self) -> Vec<TrackInfo>;

    /// A sample provider for one track.
    fn track_output(&mut self, track_id: u32) -> MuxResult<Box<dyn SampleProvider>>;

    fn start_reading(&mut self) -> bool;

    fn status(&self) -> ReaderStatus;

    fn error(&self) -> Option<MuxError>;

    fn cancel_reading(&mut self);
}
