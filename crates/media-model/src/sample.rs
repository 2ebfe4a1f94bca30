//! Timed sample units.

use serde::{Deserialize, Serialize};

use crate::time::MediaTime;

/// The media kind of a track or sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Metadata,
    Text,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Metadata => "metadata",
            MediaKind::Text => "text",
            MediaKind::Other => "other",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One opaque timed unit moved through a pipe.
///
/// The payload is whatever the source produced (an encoded audio packet, a
/// compressed video frame, a serialized metadata group). It is never
/// decoded or altered on the way to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub kind: MediaKind,

    /// Presentation timestamp.
    pub pts: MediaTime,

    /// How long the sample is presented for.
    pub duration: MediaTime,

    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
}

impl Sample {
    pub fn new(kind: MediaKind, pts: MediaTime, duration: MediaTime, payload: Vec<u8>) -> Self {
        Self {
            kind,
            pts,
            duration,
            payload,
        }
    }

    /// Exclusive end time (`pts + duration`).
    pub fn end(&self) -> MediaTime {
        self.pts + self.duration
    }
}

/// Serializes payload bytes as a base64 string so JSONL stays compact.
pub(crate) mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
