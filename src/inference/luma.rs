//! Luminance-keyed segmenter
//!
//! Treats bright pixels as foreground. Good enough to drive the pipeline
//! end-to-end without a real model.

use std::time::Duration;

use super::{Segmenter, SegmentationMask};
use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::frame::{FrameBuffer, PixelFormat};

/// Rec.601 luma weights
const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

pub struct LumaSegmenter {
    threshold: f32,
    softness: f32,
    latency: Duration,
    share_gpu_context: bool,
}

impl LumaSegmenter {
    pub fn new(threshold: f32, softness: f32) -> Self {
        Self {
            threshold,
            softness: softness.max(0.0),
            latency: Duration::ZERO,
            share_gpu_context: false,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.threshold, config.softness)
            .with_latency(Duration::from_millis(config.latency_ms))
            .with_gpu_sharing(config.share_gpu_context)
    }

    /// Sleep this long per frame to mimic model execution time
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_gpu_sharing(mut self, share: bool) -> Self {
        self.share_gpu_context = share;
        self
    }

    /// Foreground confidence for one luma value
    fn confidence(&self, luma: f32) -> f32 {
        if self.softness <= f32::EPSILON {
            return if luma >= self.threshold { 1.0 } else { 0.0 };
        }

        let lo = self.threshold - self.softness * 0.5;
        let t = ((luma - lo) / self.softness).clamp(0.0, 1.0);
        t * t * (3.0 - 2.0 * t)
    }
}

impl Segmenter for LumaSegmenter {
    fn name(&self) -> &str {
        "luma"
    }

    fn shares_gpu_context(&self) -> bool {
        self.share_gpu_context
    }

    fn segment(
        &mut self,
        frame: &FrameBuffer,
        _gpu_resident: bool,
    ) -> Result<Option<SegmentationMask>, InferenceError> {
        if !frame.is_ready() {
            return Err(InferenceError::Segment(format!(
                "frame {} was not fully copied",
                frame.frame_id()
            )));
        }

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let [r, g, b] = frame.format().rgb_offsets();
        let values: Vec<f32> = frame
            .pixels()
            .chunks_exact(PixelFormat::BYTES_PER_PIXEL)
            .map(|px| {
                let luma = (px[r] as f32 * LUMA_WEIGHTS[0]
                    + px[g] as f32 * LUMA_WEIGHTS[1]
                    + px[b] as f32 * LUMA_WEIGHTS[2])
                    / 255.0;
                self.confidence(luma)
            })
            .collect();

        Ok(SegmentationMask::from_f32(frame.width(), frame.height(), values))
    }
}
