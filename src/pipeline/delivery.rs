//! Result delivery for the two execution modes

use std::sync::Arc;

use super::pool::PooledFrame;
use super::ExecutionMode;
use crate::error::InferenceError;
use crate::inference::{CallbackHandle, GpuContext, InferenceBridge, MaskResult};
use crate::mask::MaskPublisher;

/// How masks get from the engine to the publisher during one session
pub enum ResultDelivery {
    /// Engine thread publishes through a registered callback
    Callback(CallbackHandle),
    /// The pipeline awaits each result and publishes it itself
    Awaited(Arc<MaskPublisher>),
}

impl ResultDelivery {
    /// Set up delivery for `mode`. Only the asynchronous mode registers a callback.
    pub fn attach(
        mode: ExecutionMode,
        bridge: &InferenceBridge,
        publisher: Arc<MaskPublisher>,
    ) -> Self {
        match mode {
            ExecutionMode::Asynchronous => {
                let handle = bridge.register_callback(move |result: MaskResult| {
                    publisher.publish(result.mask());
                    result.release();
                });
                ResultDelivery::Callback(handle)
            }
            ExecutionMode::Synchronous => ResultDelivery::Awaited(publisher),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            ResultDelivery::Callback(_) => ExecutionMode::Asynchronous,
            ResultDelivery::Awaited(_) => ExecutionMode::Synchronous,
        }
    }

    /// Submit a populated frame. In the awaited mode this returns only after
    /// the mask has been published and released.
    pub async fn submit(
        &self,
        bridge: &InferenceBridge,
        frame: PooledFrame,
        gpu: Option<&GpuContext>,
    ) -> Result<(), InferenceError> {
        match self {
            ResultDelivery::Callback(_) => bridge.submit(frame, gpu),
            ResultDelivery::Awaited(publisher) => {
                let frame_id = frame.frame_id();
                let pending = bridge.submit_awaited(frame, gpu)?;

                tracing::trace!("Awaiting mask for frame {}", frame_id);
                let result = pending.wait().await?;

                publisher.publish(result.mask());
                result.release();
                Ok(())
            }
        }
    }

    /// End delivery; unregisters the callback if there is one
    pub fn detach(self) {
        if let ResultDelivery::Callback(handle) = self {
            handle.unregister();
        }
    }
}
