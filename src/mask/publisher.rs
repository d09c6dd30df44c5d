use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::{MaskArray, SharedMaskArray};
use crate::inference::SegmentationMask;

/// Foreground confidence is always read from the first channel
const FOREGROUND_CHANNEL: usize = 0;

/// Notification that the shared mask array holds a new frame
#[derive(Debug, Clone)]
pub struct MaskUpdate {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub array: SharedMaskArray,
}

/// Writes engine masks into the shared array and notifies subscribers.
///
/// Safe to call from the engine's worker thread as well as from async tasks.
#[derive(Debug)]
pub struct MaskPublisher {
    array: SharedMaskArray,
    update_tx: broadcast::Sender<MaskUpdate>,
}

impl MaskPublisher {
    pub fn new(width: u32, height: u32, channel_capacity: usize) -> Self {
        let (update_tx, _) = broadcast::channel(channel_capacity.max(1));

        Self {
            array: Arc::new(RwLock::new(MaskArray::new(width, height))),
            update_tx,
        }
    }

    /// Subscribe to mask updates
    pub fn subscribe(&self) -> broadcast::Receiver<MaskUpdate> {
        self.update_tx.subscribe()
    }

    /// The shared array, for consumers that poll instead of subscribing
    pub fn array(&self) -> SharedMaskArray {
        Arc::clone(&self.array)
    }

    /// Publish a mask. Returns `false` (and leaves the array untouched) when
    /// there is no mask or its foreground channel cannot be read.
    pub fn publish(&self, mask: Option<&SegmentationMask>) -> bool {
        let Some(mask) = mask else {
            return false;
        };

        let (width, height) = (mask.width(), mask.height());
        {
            let mut array = self.array.write().unwrap_or_else(|e| e.into_inner());

            if array.width() != width || array.height() != height {
                tracing::debug!(
                    "Mask resolution changed {}x{} -> {}x{}",
                    array.width(),
                    array.height(),
                    width,
                    height
                );
                array.resize(width, height);
            }

            if !mask.try_read_channel_normalized(FOREGROUND_CHANNEL, array.values_mut()) {
                tracing::warn!("Could not read mask for frame {}", mask.frame_id());
                return false;
            }
            array.set_frame_id(mask.frame_id());
        }

        // No subscribers is fine; the array is still up to date
        let _ = self.update_tx.send(MaskUpdate {
            frame_id: mask.frame_id(),
            width,
            height,
            array: Arc::clone(&self.array),
        });

        tracing::trace!("Published mask for frame {}", mask.frame_id());
        true
    }
}
