//! Adapters bridging non-sample units into a writer input.

use trackmux_media_model::{
    MediaKind, MediaTime, MetadataGroup, PixelBuffer, PixelBufferAttributes, Sample,
};

use crate::port::WriterInput;

/// Accepts timed metadata groups for a metadata track.
pub trait TimedMetadataAdaptable: Send {
    fn append(&mut self, group: MetadataGroup) -> bool;
}

/// Accepts pixel buffers with an explicit presentation time.
pub trait PixelBufferAdaptable: Send {
    fn append(&mut self, buffer: PixelBuffer, presentation_time: MediaTime) -> bool;
}

/// The adapter attached to a non-raw-sample pipe.
pub enum Adapter {
    TimedMetadata(Box<dyn TimedMetadataAdaptable>),
    PixelBuffer(Box<dyn PixelBufferAdaptable>),
}

impl Adapter {
    pub fn name(&self) -> &'static str {
        match self {
            Adapter::TimedMetadata(_) => "timed_metadata",
            Adapter::PixelBuffer(_) => "pixel_buffer",
        }
    }
}

/// Writes metadata groups into a writer input as metadata samples.
pub struct MetadataAdaptor {
    input: WriterInput,
}

impl MetadataAdaptor {
    pub fn new(input: &WriterInput) -> Self {
        Self {
            input: input.clone(),
        }
    }
}

impl TimedMetadataAdaptable for MetadataAdaptor {
    fn append(&mut self, group: MetadataGroup) -> bool {
        match group.to_sample() {
            Ok(sample) => self.input.push(sample),
            Err(e) => {
                tracing::warn!(input = %self.input.spec().label, error = %e, "Failed to encode metadata group");
                false
            }
        }
    }
}

/// Writes pixel buffers into a writer input as video samples.
///
/// Only buffers matching the configured attributes are accepted. Frames
/// carry no duration of their own; each is shown until the next one.
pub struct PixelBufferAdaptor {
    input: WriterInput,
    attributes: PixelBufferAttributes,
}

impl PixelBufferAdaptor {
    pub fn new(input: &WriterInput, attributes: PixelBufferAttributes) -> Self {
        Self {
            input: input.clone(),
            attributes,
        }
    }

    pub fn attributes(&self) -> PixelBufferAttributes {
        self.attributes
    }
}

impl PixelBufferAdaptable for PixelBufferAdaptor {
    fn append(&mut self, buffer: PixelBuffer, presentation_time: MediaTime) -> bool {
        if !self.attributes.accepts(&buffer) {
            tracing::warn!(
                input = %self.input.spec().label,
                expected = ?self.attributes,
                got = ?buffer.attributes(),
                "Pixel buffer does not match input attributes"
            );
            return false;
        }
        let sample = Sample::new(
            MediaKind::Video,
            presentation_time,
            MediaTime::new(0, presentation_time.timescale),
            buffer.data,
        );
        self.input.push(sample)
    }
}
