//! Copying source frames into pooled buffers

use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use super::pool::PooledFrame;
use crate::error::ReadbackError;
use crate::source::ImageSource;

/// How frames leave the source, chosen once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Copy in place on the shared GPU context after the frame boundary
    GpuResident,
    /// Transfer to host memory on the blocking pool
    HostReadback,
}

impl std::fmt::Display for CopyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyStrategy::GpuResident => write!(f, "gpu-resident"),
            CopyStrategy::HostReadback => write!(f, "host readback"),
        }
    }
}

/// Frame boundary clock. Late boundaries are skipped, not replayed.
pub struct FrameClock {
    interval: Interval,
}

impl FrameClock {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Suspend until the current frame has been rendered
    pub async fn end_of_frame(&mut self) {
        self.interval.tick().await;
    }
}

pub struct ReadbackAdapter {
    strategy: CopyStrategy,
    next_frame_id: u64,
}

impl ReadbackAdapter {
    pub fn new(strategy: CopyStrategy) -> Self {
        Self {
            strategy,
            next_frame_id: 1,
        }
    }

    pub fn strategy(&self) -> CopyStrategy {
        self.strategy
    }

    /// Copy the source's current frame into `frame`.
    ///
    /// On error the buffer goes back to its pool.
    pub async fn copy<S: ImageSource>(
        &mut self,
        source: &S,
        frame: PooledFrame,
        clock: &mut FrameClock,
    ) -> Result<PooledFrame, ReadbackError> {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;

        match self.strategy {
            CopyStrategy::GpuResident => {
                clock.end_of_frame().await;

                let mut frame = frame;
                frame.copy_from(&source.current_frame(), frame_id)?;
                Ok(frame)
            }
            CopyStrategy::HostReadback => {
                let handle = source.current_frame();
                let transfer = tokio::task::spawn_blocking(move || {
                    let mut frame = frame;
                    frame.copy_from(&handle, frame_id).map(|()| frame)
                });

                let (copied, ()) = tokio::join!(transfer, clock.end_of_frame());
                copied.map_err(|e| ReadbackError::Transfer(e.to_string()))?
            }
        }
    }
}
