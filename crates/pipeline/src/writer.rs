//! The container writer collaborator.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trackmux_common::{MuxError, MuxResult};
use trackmux_media_model::MediaTime;

use crate::port::{InputSpec, WriterInput};

/// Output container kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Mov,
    Mp4,
    /// Directory with a manifest and one line-delimited file per track.
    Bundle,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Mov => "mov",
            ContainerKind::Mp4 => "mp4",
            ContainerKind::Bundle => "bundle",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mov" | "quicktime" => Ok(ContainerKind::Mov),
            "mp4" | "m4v" => Ok(ContainerKind::Mp4),
            "bundle" => Ok(ContainerKind::Bundle),
            other => Err(MuxError::configuration(format!(
                "unknown container kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

/// Sink for the exported tracks.
///
/// Inputs are added before [`ContainerWriter::start_writing`]. The writer
/// owns the drain side of every input it hands out.
#[async_trait]
pub trait ContainerWriter: Send {
    fn kind(&self) -> ContainerKind;

    /// Declare one output track, buffering up to `capacity` units.
    fn add_input(&mut self, spec: InputSpec, capacity: usize) -> MuxResult<WriterInput>;

    fn start_writing(&mut self) -> bool;

    fn start_session(&mut self, at: MediaTime);

    /// Flush every input and close the container. Resolves once the
    /// writer has reached a final status.
    async fn finish_writing(&mut self);

    fn cancel_writing(&mut self);

    fn status(&self) -> WriterStatus;

    fn error(&self) -> Option<MuxError>;
}
