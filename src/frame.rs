//! Frame data shared between image sources, the buffer pool and the engine

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ReadbackError;

/// Pixel layout of a frame (always 4 bytes per pixel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba32,
    Bgra32,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Byte offsets of the red, green and blue channels within a pixel
    pub fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Rgba32 => [0, 1, 2],
            PixelFormat::Bgra32 => [2, 1, 0],
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Rgba32 => write!(f, "rgba32"),
            PixelFormat::Bgra32 => write!(f, "bgra32"),
        }
    }
}

/// Snapshot of an image source's current frame.
///
/// Pixels are shared, so handing out a handle never copies the image.
#[derive(Debug, Clone)]
pub struct FrameHandle {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Arc<[u8]>,
}

impl FrameHandle {
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            format,
            pixels: pixels.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// A reusable block of pixel memory holding one captured image
#[derive(Debug, Default)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
    pixels: Vec<u8>,
    ready: bool,
    frame_id: u64,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * PixelFormat::BYTES_PER_PIXEL;
        Self {
            width,
            height,
            format: Some(format),
            pixels: vec![0; len],
            ready: false,
            frame_id: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format.unwrap_or(PixelFormat::Rgba32)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Whether the buffer holds a completely copied frame
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Id of the frame last copied into this buffer
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Whether the buffer can hold frames of the given shape
    pub fn matches(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.width == width && self.height == height && self.format == Some(format)
    }

    /// Mark the contents stale before the buffer is lent out again
    pub(crate) fn reset(&mut self) {
        self.ready = false;
        self.frame_id = 0;
    }

    /// Copy a source frame into this buffer, converting channel order if needed.
    pub fn copy_from(&mut self, frame: &FrameHandle, frame_id: u64) -> Result<(), ReadbackError> {
        self.ready = false;

        if frame.width != self.width || frame.height != self.height {
            return Err(ReadbackError::SizeMismatch {
                expected: (self.width, self.height),
                actual: (frame.width, frame.height),
            });
        }

        let src = frame.pixels();
        if src.len() < self.pixels.len() {
            return Err(ReadbackError::ShortFrame {
                expected: self.pixels.len(),
                actual: src.len(),
            });
        }
        let src = &src[..self.pixels.len()];

        if Some(frame.format) == self.format {
            self.pixels.copy_from_slice(src);
        } else {
            // RGBA <-> BGRA: swap the red and blue bytes
            for (dst, px) in self
                .pixels
                .chunks_exact_mut(PixelFormat::BYTES_PER_PIXEL)
                .zip(src.chunks_exact(PixelFormat::BYTES_PER_PIXEL))
            {
                dst[0] = px[2];
                dst[1] = px[1];
                dst[2] = px[0];
                dst[3] = px[3];
            }
        }

        self.frame_id = frame_id;
        self.ready = true;
        Ok(())
    }
}
