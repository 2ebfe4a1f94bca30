//! The source side of a track pipe.
//!
//! A [`Provider`] is one of three closed shapes. Each yields a finite,
//! non-restartable sequence and keeps returning `None` once exhausted.

use trackmux_media_model::{Image, MetadataGroup, PixelBuffer, Sample, TimeRange, TimedPixelBuffer};

/// A pull source of raw samples, typically one reader track output.
pub trait SampleProvider: Send {
    /// The next sample, or `None` when the source has nothing more.
    fn next_sample(&mut self) -> Option<Sample>;
}

/// Adapts any sample iterator into a [`SampleProvider`].
pub struct SampleIter<I>(pub I);

impl<I> SampleProvider for SampleIter<I>
where
    I: Iterator<Item = Sample> + Send,
{
    fn next_sample(&mut self) -> Option<Sample> {
        self.0.next()
    }
}

/// Which shape of unit a provider produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    RawSample,
    TimedMetadata,
    PixelBuffer,
}

/// Raw samples from a [`SampleProvider`], fused after the first `None`.
pub struct RawSampleStream {
    source: Box<dyn SampleProvider>,
    exhausted: bool,
}

impl RawSampleStream {
    pub fn new(source: Box<dyn SampleProvider>) -> Self {
        Self {
            source,
            exhausted: false,
        }
    }

    pub fn next_sample(&mut self) -> Option<Sample> {
        if self.exhausted {
            return None;
        }
        let next = self.source.next_sample();
        if next.is_none() {
            self.exhausted = true;
        }
        next
    }
}

/// Timed metadata groups supplied up front.
pub struct TimedMetadataStream {
    groups: std::vec::IntoIter<MetadataGroup>,
}

impl TimedMetadataStream {
    pub fn new(groups: Vec<MetadataGroup>) -> Self {
        Self {
            groups: groups.into_iter(),
        }
    }

    pub fn next_group(&mut self) -> Option<MetadataGroup> {
        self.groups.next()
    }
}

/// Pixel buffers rendered from still images, each shown at the start of
/// its matching time range.
///
/// The stream ends at the shorter of the two sequences, or at the first
/// image that cannot be rendered.
pub struct PixelBufferStream {
    images: std::vec::IntoIter<Image>,
    time_ranges: std::vec::IntoIter<TimeRange>,
    first: Option<PixelBuffer>,
    exhausted: bool,
}

impl PixelBufferStream {
    pub fn new(images: Vec<Image>, time_ranges: Vec<TimeRange>) -> Self {
        let first = images.first().and_then(Image::to_pixel_buffer);
        Self {
            images: images.into_iter(),
            time_ranges: time_ranges.into_iter(),
            first,
            exhausted: false,
        }
    }

    /// The first frame, used to configure the writer input.
    pub fn first_pixel_buffer(&self) -> Option<&PixelBuffer> {
        self.first.as_ref()
    }

    pub fn next_pixel_buffer(&mut self) -> Option<TimedPixelBuffer> {
        if self.exhausted {
            return None;
        }
        let next = match (self.images.next(), self.time_ranges.next()) {
            (Some(image), Some(range)) => image.to_pixel_buffer().map(|buffer| TimedPixelBuffer {
                buffer,
                time: range.start,
            }),
            _ => None,
        };
        if next.is_none() {
            self.exhausted = true;
        }
        next
    }
}

/// A source of timed units for one pipe.
pub enum Provider {
    Raw(RawSampleStream),
    TimedMetadata(TimedMetadataStream),
    PixelBuffer(PixelBufferStream),
}

impl Provider {
    pub fn raw(source: Box<dyn SampleProvider>) -> Self {
        Provider::Raw(RawSampleStream::new(source))
    }

    pub fn timed_metadata(groups: Vec<MetadataGroup>) -> Self {
        Provider::TimedMetadata(TimedMetadataStream::new(groups))
    }

    pub fn pixel_buffers(images: Vec<Image>, time_ranges: Vec<TimeRange>) -> Self {
        Provider::PixelBuffer(PixelBufferStream::new(images, time_ranges))
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Raw(_) => ProviderKind::RawSample,
            Provider::TimedMetadata(_) => ProviderKind::TimedMetadata,
            Provider::PixelBuffer(_) => ProviderKind::PixelBuffer,
        }
    }
}
