//! Segmentation mask produced by the inference engine

/// Per-pixel sample storage
#[derive(Debug, Clone, PartialEq)]
pub enum MaskData {
    /// Confidence values, nominally 0.0 - 1.0
    F32(Vec<f32>),
    /// Quantized confidence, 0 - 255
    U8(Vec<u8>),
}

impl MaskData {
    fn len(&self) -> usize {
        match self {
            MaskData::F32(v) => v.len(),
            MaskData::U8(v) => v.len(),
        }
    }
}

/// Engine-produced per-pixel confidence map with interleaved channels
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    channels: usize,
    data: MaskData,
    frame_id: u64,
}

impl SegmentationMask {
    /// Build a mask; returns `None` if `data` does not hold
    /// `width * height * channels` samples.
    pub fn new(width: u32, height: u32, channels: usize, data: MaskData) -> Option<Self> {
        let expected = width as usize * height as usize * channels;
        if channels == 0 || data.len() != expected {
            return None;
        }

        Some(Self {
            width,
            height,
            channels,
            data,
            frame_id: 0,
        })
    }

    /// Single-channel float mask
    pub fn from_f32(width: u32, height: u32, values: Vec<f32>) -> Option<Self> {
        Self::new(width, height, 1, MaskData::F32(values))
    }

    /// Tag the mask with the id of the frame it was computed from
    pub fn with_frame_id(mut self, frame_id: u64) -> Self {
        self.frame_id = frame_id;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Read one channel into `dst` as 0.0 - 1.0 values.
    ///
    /// Returns `false` without touching `dst` if the channel does not exist or
    /// `dst` does not have exactly one slot per pixel.
    pub fn try_read_channel_normalized(&self, channel: usize, dst: &mut [f32]) -> bool {
        if channel >= self.channels || dst.len() != self.pixel_count() {
            return false;
        }

        match &self.data {
            MaskData::F32(values) => {
                for (out, v) in dst
                    .iter_mut()
                    .zip(values.iter().skip(channel).step_by(self.channels))
                {
                    *out = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
                }
            }
            MaskData::U8(values) => {
                for (out, v) in dst
                    .iter_mut()
                    .zip(values.iter().skip(channel).step_by(self.channels))
                {
                    *out = *v as f32 / 255.0;
                }
            }
        }

        true
    }
}
