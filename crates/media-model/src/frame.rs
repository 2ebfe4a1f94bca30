//! Still images and the pixel buffers derived from them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use trackmux_common::error::{MuxError, MuxResult};

use crate::time::MediaTime;

/// Pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit alpha, red, green, blue; alpha is written opaque.
    Argb32,
    /// 8-bit red, green, blue, alpha.
    Rgba32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// A decoded RGBA image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rgba,
        }
    }

    /// A single-color image, mostly useful for synthetic tracks and tests.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        Self::new(width, height, rgba.repeat(pixels))
    }

    /// Decode an encoded image (PNG) from memory.
    pub fn decode(bytes: &[u8]) -> MuxResult<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| MuxError::configuration(format!("Failed to decode image: {e}")))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self::new(width, height, decoded.into_raw()))
    }

    /// Decode an image file.
    pub fn open(path: &Path) -> MuxResult<Self> {
        if !path.exists() {
            return Err(MuxError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::decode(&std::fs::read(path)?)
    }

    /// Render the image into an opaque ARGB32 pixel buffer.
    ///
    /// Returns `None` for empty images or when the pixel data does not
    /// match the declared dimensions.
    pub fn to_pixel_buffer(&self) -> Option<PixelBuffer> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.rgba.len() != expected {
            return None;
        }

        let mut data = Vec::with_capacity(expected);
        for px in self.rgba.chunks_exact(4) {
            data.extend_from_slice(&[0xFF, px[0], px[1], px[2]]);
        }

        Some(PixelBuffer {
            width: self.width,
            height: self.height,
            format: PixelFormat::Argb32,
            data,
        })
    }
}

/// Raw pixels ready to be handed to a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// The attributes a writer input must be configured with to accept
    /// this buffer.
    pub fn attributes(&self) -> PixelBufferAttributes {
        PixelBufferAttributes {
            format: self.format,
            width: self.width,
            height: self.height,
        }
    }

    pub fn bytes_per_row(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}

/// A pixel buffer with its presentation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedPixelBuffer {
    pub buffer: PixelBuffer,
    pub time: MediaTime,
}

/// Source attributes a pixel-buffer writer input is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBufferAttributes {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl PixelBufferAttributes {
    /// Whether a buffer matches these attributes exactly.
    pub fn accepts(&self, buffer: &PixelBuffer) -> bool {
        buffer.attributes() == *self && buffer.data.len() == buffer.bytes_per_row() * self.height as usize
    }
}
