//! Error types shared across trackmux crates.

use std::fmt;
use std::path::PathBuf;

/// Which side of an export reported an underlying I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSide {
    /// The asset reader feeding the pipes.
    Reader,
    /// The container writer receiving the pipes' output.
    Writer,
}

impl fmt::Display for IoSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoSide::Reader => f.write_str("reader"),
            IoSide::Writer => f.write_str("writer"),
        }
    }
}

/// Top-level error type for trackmux operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Invalid track/provider/adapter combination, detected before any pipe starts.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The reader or writer could not begin.
    #[error("Start failed: {message}")]
    StartFailed { message: String },

    /// The reader or writer reported an error while or after pipes ran.
    #[error("Underlying {side} failure: {message}")]
    UnderlyingIo { side: IoSide, message: String },

    /// The completion barrier did not drain in time.
    #[error("Export did not complete within {waited_ms}ms")]
    CompletionTimeout { waited_ms: u64 },

    /// A failure was detected but no underlying error was available.
    #[error("Unknown export failure")]
    Unknown,

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MuxError.
pub type MuxResult<T> = Result<T, MuxError>;

impl MuxError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn start_failed(msg: impl Into<String>) -> Self {
        Self::StartFailed {
            message: msg.into(),
        }
    }

    pub fn reader(msg: impl Into<String>) -> Self {
        Self::UnderlyingIo {
            side: IoSide::Reader,
            message: msg.into(),
        }
    }

    pub fn writer(msg: impl Into<String>) -> Self {
        Self::UnderlyingIo {
            side: IoSide::Writer,
            message: msg.into(),
        }
    }

    /// Stable short name of the variant, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            MuxError::Configuration { .. } => "configuration",
            MuxError::StartFailed { .. } => "start_failed",
            MuxError::UnderlyingIo { .. } => "underlying_io",
            MuxError::CompletionTimeout { .. } => "completion_timeout",
            MuxError::Unknown => "unknown",
            MuxError::FileNotFound { .. } => "file_not_found",
            MuxError::Io(_) => "io",
            MuxError::Json(_) => "json",
            MuxError::Other(_) => "other",
        }
    }
}
