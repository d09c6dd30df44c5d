//! Mask publishing
//!
//! Converts engine masks into a flat normalized array shared with consumers.

pub mod publisher;

pub use publisher::{MaskPublisher, MaskUpdate};

use std::sync::{Arc, RwLock};

/// Row-major foreground confidence (0.0 - 1.0), one value per pixel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskArray {
    width: u32,
    height: u32,
    values: Vec<f32>,
    frame_id: u64,
}

impl MaskArray {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
            frame_id: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Id of the frame whose mask last filled the array
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Value at pixel (x, y), or `None` outside the array
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Fraction of the frame that is foreground
    pub fn coverage(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f32>() / self.values.len() as f32
    }

    /// Reallocate for a new resolution; contents are zeroed
    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height);
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub(crate) fn set_frame_id(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
    }
}

/// Mask array shared between the publisher and its subscribers
pub type SharedMaskArray = Arc<RwLock<MaskArray>>;
