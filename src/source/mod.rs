//! Image sources feeding the frame pipeline

pub mod test_pattern;

pub use test_pattern::TestPatternSource;

use std::future::Future;

use crate::error::{MaskcastError, SourceError};
use crate::frame::{FrameHandle, PixelFormat};
use crate::pipeline::ReadyNotifier;

/// A live video source (camera, capture card, render target...)
pub trait ImageSource: Send + Sync + 'static {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn format(&self) -> PixelFormat;

    /// Whether the source started successfully and can hand out frames
    fn is_prepared(&self) -> bool;

    /// Whether frames can be copied without a round-trip through host memory
    fn supports_gpu_copy(&self) -> bool {
        false
    }

    /// Snapshot of the most recent frame
    fn current_frame(&self) -> FrameHandle;

    /// Start producing frames
    fn play(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Stop producing frames
    fn stop(&mut self);
}

/// Start a source and hand it to a waiting pipeline
pub async fn prepare_source<S: ImageSource>(
    mut source: S,
    notifier: ReadyNotifier<S>,
) -> Result<(), MaskcastError> {
    source.play().await?;

    if !source.is_prepared() {
        return Err(SourceError::NotPrepared(format!(
            "{}x{} source did not report ready after play",
            source.width(),
            source.height()
        ))
        .into());
    }

    tracing::info!(
        "Image source ready: {}x{} {} (GPU copy: {})",
        source.width(),
        source.height(),
        source.format(),
        source.supports_gpu_copy()
    );

    if !notifier.source_ready(source).await {
        tracing::warn!("Pipeline went away before the image source was ready");
    }

    Ok(())
}
