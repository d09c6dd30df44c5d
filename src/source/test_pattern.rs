//! Synthetic video source: a bright disc sweeping over a dark gradient

use std::sync::Mutex;
use std::time::Instant;

use super::ImageSource;
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::frame::{FrameHandle, PixelFormat};

/// Seconds for the disc to cross the frame once
const SWEEP_SECONDS: f64 = 4.0;

pub struct TestPatternSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    fps: f64,
    gpu_copy: bool,
    started: Option<Instant>,
    /// Last rendered frame, keyed by frame index
    cache: Mutex<Option<(u64, FrameHandle)>>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, format: PixelFormat, fps: f64) -> Self {
        Self {
            width,
            height,
            format,
            fps,
            gpu_copy: false,
            started: None,
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.width, config.height, config.format, config.fps)
            .with_gpu_copy(config.gpu_copy)
    }

    pub fn with_gpu_copy(mut self, gpu_copy: bool) -> Self {
        self.gpu_copy = gpu_copy;
        self
    }

    fn frame_index(&self) -> u64 {
        match self.started {
            Some(started) => (started.elapsed().as_secs_f64() * self.fps) as u64,
            None => 0,
        }
    }

    /// Render frame `index` of the animation
    pub fn render(&self, index: u64) -> FrameHandle {
        let (w, h) = (self.width as f32, self.height as f32);
        let phase = ((index as f64 / self.fps) / SWEEP_SECONDS).fract() as f32;

        let cx = phase * w;
        let cy = h * 0.5;
        let radius = w.min(h) * 0.2;
        let radius_sq = radius * radius;

        let [r, g, b] = self.format.rgb_offsets();
        let mut pixels = vec![0u8; self.width as usize * self.height as usize * 4];

        for (i, px) in pixels.chunks_exact_mut(PixelFormat::BYTES_PER_PIXEL).enumerate() {
            let x = (i % self.width as usize) as f32;
            let y = (i / self.width as usize) as f32;
            let (dx, dy) = (x - cx, y - cy);

            let color = if dx * dx + dy * dy <= radius_sq {
                [240, 230, 210]
            } else {
                let shade = (16.0 + 48.0 * (y / h)) as u8;
                [shade / 2, shade / 2, shade]
            };

            px[r] = color[0];
            px[g] = color[1];
            px[b] = color[2];
            px[3] = 255;
        }

        FrameHandle::new(self.width, self.height, self.format, pixels)
    }
}

impl ImageSource for TestPatternSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn is_prepared(&self) -> bool {
        self.started.is_some()
    }

    fn supports_gpu_copy(&self) -> bool {
        self.gpu_copy
    }

    fn current_frame(&self) -> FrameHandle {
        let index = self.frame_index();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((cached, handle)) = cache.as_ref() {
            if *cached == index {
                return handle.clone();
            }
        }

        let handle = self.render(index);
        *cache = Some((index, handle.clone()));
        handle
    }

    async fn play(&mut self) -> Result<(), SourceError> {
        if self.width == 0 || self.height == 0 || self.fps <= 0.0 {
            return Err(SourceError::Start(format!(
                "invalid test pattern {}x{} @ {} fps",
                self.width, self.height, self.fps
            )));
        }

        self.started = Some(Instant::now());
        tracing::debug!("Test pattern started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.started.take().is_some() {
            tracing::debug!("Test pattern stopped");
        }
    }
}
