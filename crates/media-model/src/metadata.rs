//! Timed metadata groups.
//!
//! A metadata track is a sequence of [`MetadataGroup`]s, each covering a
//! time range and carrying one or more identified items. Groups are moved
//! through the pipeline as JSON-encoded sample payloads.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use trackmux_common::error::{MuxError, MuxResult};

use crate::sample::{MediaKind, Sample};
use crate::time::TimeRange;

/// Key space prefix for user metadata identifiers.
pub const METADATA_KEY_SPACE: &str = "mdta";

/// Well-known metadata data types.
pub mod data_types {
    pub const UTF8: &str = "utf8";
    pub const PNG: &str = "png";
    pub const RAW: &str = "raw";
}

/// Build a full identifier (`mdta/<key>`) from a reverse-DNS key.
pub fn identifier_for_key(key: &str) -> String {
    format!("{METADATA_KEY_SPACE}/{key}")
}

/// The value carried by a metadata item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Utf8(String),
    Data(#[serde(with = "crate::sample::payload_base64")] Vec<u8>),
}

/// A single identified metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub identifier: Option<String>,
    pub data_type: Option<String>,
    pub value: MetadataValue,
}

impl MetadataItem {
    /// The item's value as a string, if it is textual.
    pub fn string_value(&self) -> Option<&str> {
        match &self.value {
            MetadataValue::Utf8(s) => Some(s),
            MetadataValue::Data(_) => None,
        }
    }

    /// The item's value as raw bytes, if it is binary.
    pub fn data_value(&self) -> Option<&[u8]> {
        match &self.value {
            MetadataValue::Data(d) => Some(d),
            MetadataValue::Utf8(_) => None,
        }
    }
}

/// A set of metadata items that applies to one time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataGroup {
    pub items: Vec<MetadataItem>,
    pub time_range: TimeRange,
}

impl MetadataGroup {
    pub fn new(items: Vec<MetadataItem>, time_range: TimeRange) -> Self {
        Self { items, time_range }
    }

    /// A group holding one UTF-8 item whose value is `strings` joined by a
    /// single space.
    pub fn from_strings(strings: &[&str], time_range: TimeRange, key: &str) -> Self {
        let item = MetadataItem {
            identifier: Some(identifier_for_key(key)),
            data_type: Some(data_types::UTF8.to_string()),
            value: MetadataValue::Utf8(strings.join(" ")),
        };
        Self::new(vec![item], time_range)
    }

    /// A group holding one PNG item with the given encoded image bytes.
    pub fn from_image_bytes(png: Vec<u8>, time_range: TimeRange, key: &str) -> Self {
        let item = MetadataItem {
            identifier: Some(identifier_for_key(key)),
            data_type: Some(data_types::PNG.to_string()),
            value: MetadataValue::Data(png),
        };
        Self::new(vec![item], time_range)
    }

    /// A group holding the contents of a PNG file.
    pub fn from_image_file(path: &Path, time_range: TimeRange, key: &str) -> MuxResult<Self> {
        if !path.exists() {
            return Err(MuxError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        Ok(Self::from_image_bytes(bytes, time_range, key))
    }

    /// Encode the group as a metadata sample spanning its time range.
    pub fn to_sample(&self) -> MuxResult<Sample> {
        let payload = serde_json::to_vec(&self.items)?;
        Ok(Sample::new(
            MediaKind::Metadata,
            self.time_range.start,
            self.time_range.duration,
            payload,
        ))
    }

    /// Decode a group previously encoded with [`MetadataGroup::to_sample`].
    pub fn from_sample(sample: &Sample) -> MuxResult<Self> {
        if sample.kind != MediaKind::Metadata {
            return Err(MuxError::configuration(format!(
                "expected a metadata sample, got {}",
                sample.kind
            )));
        }
        let items: Vec<MetadataItem> = serde_json::from_slice(&sample.payload)?;
        Ok(Self::new(
            items,
            TimeRange::new(sample.pts, sample.duration),
        ))
    }
}

/// One `(identifier, data_type)` pair a metadata track declares.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetadataSpec {
    pub identifier: String,
    pub data_type: String,
}

/// Format description of a metadata track: the distinct item
/// specifications found across its groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFormat {
    pub specs: Vec<MetadataSpec>,
}

impl MetadataFormat {
    /// Collect the identifier and data type of every item that has both an
    /// identifier and a data type. Items missing either are skipped.
    ///
    /// Fails when no item is describable, since such a track could not be
    /// declared to the writer.
    pub fn from_groups(groups: &[MetadataGroup]) -> MuxResult<Self> {
        let specs: BTreeSet<MetadataSpec> = groups
            .iter()
            .flat_map(|g| g.items.iter())
            .filter_map(|item| match (&item.identifier, &item.data_type) {
                (Some(identifier), Some(data_type)) => Some(MetadataSpec {
                    identifier: identifier.clone(),
                    data_type: data_type.clone(),
                }),
                _ => None,
            })
            .collect();

        if specs.is_empty() {
            return Err(MuxError::configuration(
                "metadata groups carry no item with both an identifier and a data type",
            ));
        }

        Ok(Self {
            specs: specs.into_iter().collect(),
        })
    }
}
