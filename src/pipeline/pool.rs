//! Bounded pool of reusable frame buffers
//!
//! Buffers are allocated lazily up to a fixed capacity. A borrowed buffer is
//! wrapped in a [`PooledFrame`] guard; dropping the guard (on any thread, e.g.
//! the inference worker once it has consumed the frame) sends the buffer back
//! over a crossbeam channel that the pool drains on its next acquire.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::ops::{Deref, DerefMut};

use crate::frame::{FrameBuffer, PixelFormat};

/// Fixed-capacity frame buffer pool
pub struct FramePool {
    width: u32,
    height: u32,
    format: PixelFormat,
    capacity: usize,
    free: Vec<FrameBuffer>,
    allocated: usize,
    return_tx: Sender<FrameBuffer>,
    return_rx: Receiver<FrameBuffer>,
}

impl FramePool {
    /// Create an empty pool that will hand out at most `capacity` buffers
    pub fn new(width: u32, height: u32, format: PixelFormat, capacity: usize) -> Self {
        let (return_tx, return_rx) = bounded(capacity.max(1));

        Self {
            width,
            height,
            format,
            capacity,
            free: Vec::with_capacity(capacity),
            allocated: 0,
            return_tx,
            return_rx,
        }
    }

    /// Borrow a buffer if one is free, without blocking or over-allocating
    pub fn try_acquire(&mut self) -> Option<PooledFrame> {
        self.reclaim();

        let buffer = match self.free.pop() {
            Some(buffer) => buffer,
            None if self.allocated < self.capacity => {
                self.allocated += 1;
                tracing::trace!(
                    "Allocated frame buffer {}/{} ({}x{} {})",
                    self.allocated,
                    self.capacity,
                    self.width,
                    self.height,
                    self.format
                );
                FrameBuffer::new(self.width, self.height, self.format)
            }
            None => return None,
        };

        Some(PooledFrame {
            buffer,
            home: self.return_tx.clone(),
        })
    }

    /// Return a borrowed buffer to the free set
    pub fn release(&mut self, frame: PooledFrame) {
        drop(frame);
        self.reclaim();
    }

    /// Number of buffers currently lent out
    pub fn borrowed(&mut self) -> usize {
        self.reclaim();
        self.allocated - self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers allocated so far (never exceeds capacity)
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    fn reclaim(&mut self) {
        while let Ok(mut buffer) = self.return_rx.try_recv() {
            if buffer.matches(self.width, self.height, self.format) {
                buffer.reset();
                self.free.push(buffer);
            } else {
                // Foreign or resized buffer: discard it and free its slot
                self.allocated = self.allocated.saturating_sub(1);
            }
        }
    }
}

/// Exclusive borrow of a pooled [`FrameBuffer`]
pub struct PooledFrame {
    buffer: FrameBuffer,
    home: Sender<FrameBuffer>,
}

impl std::fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFrame")
            .field("width", &self.buffer.width())
            .field("height", &self.buffer.height())
            .field("frame_id", &self.buffer.frame_id())
            .field("ready", &self.buffer.is_ready())
            .finish()
    }
}

impl Deref for PooledFrame {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        // Fails only once the pool is gone, in which case the buffer is freed
        let _ = self.home.try_send(buffer);
    }
}
