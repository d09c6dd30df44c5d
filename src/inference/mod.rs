//! Inference bridge
//!
//! Runs a [`Segmenter`] engine on its own worker thread and delivers its
//! masks under one of two disciplines:
//! - callback: [`InferenceBridge::submit`] is fire-and-forget and every result
//!   is handed to the registered callback on the worker thread
//! - awaited: [`InferenceBridge::submit_awaited`] returns a [`PendingMask`]
//!   that completes with the result of that one submission

pub mod luma;
pub mod mask;

pub use luma::LumaSegmenter;
pub use mask::{MaskData, SegmentationMask};

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use tokio::sync::oneshot;

use crate::error::{InferenceError, MaskcastError};
use crate::frame::FrameBuffer;
use crate::pipeline::pool::PooledFrame;
use crate::pipeline::ReadyNotifier;

/// An image-segmentation engine driven by the bridge's worker thread
pub trait Segmenter: Send + 'static {
    /// Engine name used in logs and the worker thread name
    fn name(&self) -> &str;

    /// One-time setup (model load, warm-up), run on the worker thread
    fn initialize(&mut self) -> Result<(), InferenceError> {
        Ok(())
    }

    /// Whether the engine can consume GPU-resident frames through a shared context
    fn shares_gpu_context(&self) -> bool {
        false
    }

    /// Segment one frame. `Ok(None)` means the engine produced no mask this time.
    fn segment(
        &mut self,
        frame: &FrameBuffer,
        gpu_resident: bool,
    ) -> Result<Option<SegmentationMask>, InferenceError>;
}

/// Counters shared between the bridge, its worker and outstanding results
#[derive(Debug, Default)]
pub struct BridgeStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    gpu_contexts: AtomicUsize,
}

impl BridgeStats {
    /// Frames accepted by the bridge
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Frames the engine has finished with
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Submissions whose result has not been released yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously unreleased submissions
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Shared GPU contexts currently held
    pub fn gpu_contexts(&self) -> usize {
        self.gpu_contexts.load(Ordering::Acquire)
    }

    fn lease(self: &Arc<Self>) -> InFlightLease {
        self.submitted.fetch_add(1, Ordering::AcqRel);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlightLease {
            stats: Arc::clone(self),
        }
    }
}

/// Keeps a submission counted as in flight until its result is released
#[derive(Debug)]
struct InFlightLease {
    stats: Arc<BridgeStats>,
}

impl Drop for InFlightLease {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Outcome of one submission. The mask is owned by the bridge until the
/// result is released (explicitly or by drop).
#[derive(Debug)]
pub struct MaskResult {
    frame_id: u64,
    mask: Option<SegmentationMask>,
    _lease: InFlightLease,
}

impl MaskResult {
    /// Id of the frame this result was computed from
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// The mask, if the engine produced one
    pub fn mask(&self) -> Option<&SegmentationMask> {
        self.mask.as_ref()
    }

    /// Dispose of the mask and end the submission's in-flight lease
    pub fn release(self) {}
}

type MaskCallback = Arc<dyn Fn(MaskResult) + Send + Sync>;
type CallbackSlot = Arc<RwLock<Option<MaskCallback>>>;

/// Registration of a result callback; unregisters on drop
pub struct CallbackHandle {
    slot: CallbackSlot,
}

impl CallbackHandle {
    /// Stop delivering results to the callback
    pub fn unregister(self) {}
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if slot.take().is_some() {
            tracing::debug!("Mask callback unregistered");
        }
    }
}

/// Result of an awaited submission
pub struct PendingMask {
    rx: oneshot::Receiver<MaskResult>,
}

impl PendingMask {
    /// Suspend until the engine has processed the frame
    pub async fn wait(self) -> Result<MaskResult, InferenceError> {
        self.rx.await.map_err(|_| InferenceError::ResultDropped)
    }
}

/// Render GPU context shared with the engine for one pipeline session.
/// Released when dropped.
#[derive(Debug)]
pub struct GpuContext {
    engine: String,
    stats: Arc<BridgeStats>,
}

impl GpuContext {
    pub fn engine(&self) -> &str {
        &self.engine
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.stats.gpu_contexts.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!("Released GPU context shared with {}", self.engine);
    }
}

struct Job {
    frame: PooledFrame,
    gpu_resident: bool,
    reply: Option<oneshot::Sender<MaskResult>>,
    lease: InFlightLease,
}

/// Handle to a running inference engine
pub struct InferenceBridge {
    name: String,
    shares_gpu_context: bool,
    job_tx: Option<Sender<Job>>,
    callback: CallbackSlot,
    stats: Arc<BridgeStats>,
    worker: Option<thread::JoinHandle<()>>,
}

impl InferenceBridge {
    /// Spawn the worker thread and wait for the engine to initialize
    pub async fn start<E: Segmenter>(mut engine: E) -> Result<Self, InferenceError> {
        let name = engine.name().to_string();
        let shares_gpu_context = engine.shares_gpu_context();

        let (job_tx, job_rx) = unbounded::<Job>();
        let (init_tx, init_rx) = oneshot::channel();
        let callback: CallbackSlot = Arc::new(RwLock::new(None));
        let stats = Arc::new(BridgeStats::default());

        let worker_callback = Arc::clone(&callback);
        let worker_stats = Arc::clone(&stats);
        let worker = thread::Builder::new()
            .name(format!("inference-{}", name))
            .spawn(move || {
                if let Err(e) = engine.initialize() {
                    let _ = init_tx.send(Err(e));
                    return;
                }
                let _ = init_tx.send(Ok(()));
                run_worker(engine, job_rx, worker_callback, worker_stats);
            })
            .map_err(|e| InferenceError::WorkerSpawn(e.to_string()))?;

        init_rx.await.map_err(|_| InferenceError::Disconnected)??;

        tracing::info!(
            "Inference engine '{}' ready (shares GPU context: {})",
            name,
            shares_gpu_context
        );

        Ok(Self {
            name,
            shares_gpu_context,
            job_tx: Some(job_tx),
            callback,
            stats,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shares_gpu_context(&self) -> bool {
        self.shares_gpu_context
    }

    /// Shared counters; stay valid after the bridge is gone
    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    /// Whether a result callback is currently registered
    pub fn has_callback(&self) -> bool {
        self.callback
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Acquire the render GPU context if the engine can share one
    pub fn acquire_gpu_context(&self) -> Option<GpuContext> {
        if !self.shares_gpu_context {
            return None;
        }

        self.stats.gpu_contexts.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Acquired GPU context shared with {}", self.name);
        Some(GpuContext {
            engine: self.name.clone(),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Register the callback that receives results of [`submit`](Self::submit).
    ///
    /// The callback runs on the engine's worker thread. Registering again
    /// replaces the previous callback.
    pub fn register_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(MaskResult) + Send + Sync + 'static,
    {
        let mut slot = self.callback.write().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            tracing::warn!("Replacing existing mask callback on '{}'", self.name);
        }
        *slot = Some(Arc::new(callback));

        CallbackHandle {
            slot: Arc::clone(&self.callback),
        }
    }

    /// Fire-and-forget submission; the result goes to the registered callback
    pub fn submit(
        &self,
        frame: PooledFrame,
        gpu: Option<&GpuContext>,
    ) -> Result<(), InferenceError> {
        self.enqueue(frame, gpu.is_some(), None)
    }

    /// Submission whose result is returned through the pending handle
    pub fn submit_awaited(
        &self,
        frame: PooledFrame,
        gpu: Option<&GpuContext>,
    ) -> Result<PendingMask, InferenceError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(frame, gpu.is_some(), Some(tx))?;
        Ok(PendingMask { rx })
    }

    fn enqueue(
        &self,
        frame: PooledFrame,
        gpu_resident: bool,
        reply: Option<oneshot::Sender<MaskResult>>,
    ) -> Result<(), InferenceError> {
        let job_tx = self.job_tx.as_ref().ok_or(InferenceError::Disconnected)?;
        let job = Job {
            frame,
            gpu_resident,
            reply,
            lease: self.stats.lease(),
        };

        job_tx.send(job).map_err(|_| InferenceError::Disconnected)
    }

    /// Stop accepting frames and wait for the worker to drain its queue
    pub fn shutdown(&mut self) {
        self.job_tx = None;

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Inference worker '{}' panicked", self.name);
            } else {
                tracing::debug!("Inference worker '{}' stopped", self.name);
            }
        }
    }
}

impl Drop for InferenceBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<E: Segmenter>(
    mut engine: E,
    jobs: Receiver<Job>,
    callback: CallbackSlot,
    stats: Arc<BridgeStats>,
) {
    for job in jobs {
        let Job {
            frame,
            gpu_resident,
            reply,
            lease,
        } = job;

        let frame_id = frame.frame_id();
        let mask = match engine.segment(&frame, gpu_resident) {
            Ok(mask) => mask.map(|m| m.with_frame_id(frame_id)),
            Err(e) => {
                tracing::warn!("Engine '{}' failed on frame {}: {}", engine.name(), frame_id, e);
                None
            }
        };
        // The engine is done with the input; hand the buffer back to the pool
        drop(frame);
        stats.completed.fetch_add(1, Ordering::AcqRel);

        let result = MaskResult {
            frame_id,
            mask,
            _lease: lease,
        };

        match reply {
            Some(tx) => {
                if tx.send(result).is_err() {
                    tracing::trace!("Awaiting side gave up on frame {}", frame_id);
                }
            }
            None => {
                let callback = callback
                    .read()
                    .ok()
                    .and_then(|slot| slot.as_ref().map(Arc::clone));
                match callback {
                    Some(callback) => callback(result),
                    None => tracing::trace!("No mask callback, dropping frame {}", frame_id),
                }
            }
        }
    }
}

/// Start an engine and announce it to a waiting pipeline
pub async fn prepare_engine<E: Segmenter, S>(
    engine: E,
    notifier: ReadyNotifier<S>,
) -> Result<(), MaskcastError> {
    let bridge = InferenceBridge::start(engine).await?;

    if !notifier.engine_ready(bridge).await {
        tracing::warn!("Pipeline went away before the inference engine was ready");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameHandle, PixelFormat};
    use crate::pipeline::pool::FramePool;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes the frame's first byte as a uniform mask value
    struct EchoSegmenter;

    impl Segmenter for EchoSegmenter {
        fn name(&self) -> &str {
            "echo"
        }

        fn segment(
            &mut self,
            frame: &FrameBuffer,
            _gpu_resident: bool,
        ) -> Result<Option<SegmentationMask>, InferenceError> {
            if frame.pixels()[0] == 0 {
                return Err(InferenceError::Segment("blank frame".to_string()));
            }
            let value = frame.pixels()[0] as f32 / 255.0;
            let count = frame.width() as usize * frame.height() as usize;
            Ok(SegmentationMask::from_f32(
                frame.width(),
                frame.height(),
                vec![value; count],
            ))
        }
    }

    struct FailingInit;

    impl Segmenter for FailingInit {
        fn name(&self) -> &str {
            "broken"
        }

        fn initialize(&mut self) -> Result<(), InferenceError> {
            Err(InferenceError::Initialize("model missing".to_string()))
        }

        fn segment(
            &mut self,
            _frame: &FrameBuffer,
            _gpu_resident: bool,
        ) -> Result<Option<SegmentationMask>, InferenceError> {
            Ok(None)
        }
    }

    fn filled_frame(pool: &mut FramePool, value: u8, frame_id: u64) -> PooledFrame {
        let mut frame = pool.try_acquire().unwrap();
        let handle = FrameHandle::new(2, 2, PixelFormat::Rgba32, vec![value; 16]);
        frame.copy_from(&handle, frame_id).unwrap();
        frame
    }

    #[tokio::test]
    async fn test_awaited_submission() {
        let bridge = InferenceBridge::start(EchoSegmenter).await.unwrap();
        let mut pool = FramePool::new(2, 2, PixelFormat::Rgba32, 2);

        let pending = bridge
            .submit_awaited(filled_frame(&mut pool, 255, 42), None)
            .unwrap();
        let result = pending.wait().await.unwrap();

        assert_eq!(result.frame_id(), 42);
        let mask = result.mask().unwrap();
        assert_eq!(mask.frame_id(), 42);
        assert_eq!(bridge.stats().in_flight(), 1);

        result.release();
        assert_eq!(bridge.stats().in_flight(), 0);
        assert_eq!(bridge.stats().completed(), 1);
        // The engine handed the input buffer back
        assert_eq!(pool.borrowed(), 0);
    }

    #[tokio::test]
    async fn test_engine_error_yields_absent_mask() {
        let bridge = InferenceBridge::start(EchoSegmenter).await.unwrap();
        let mut pool = FramePool::new(2, 2, PixelFormat::Rgba32, 1);

        let result = bridge
            .submit_awaited(filled_frame(&mut pool, 0, 1), None)
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(result.mask().is_none());
    }

    #[tokio::test]
    async fn test_callback_delivery_and_unregister() {
        let bridge = InferenceBridge::start(EchoSegmenter).await.unwrap();
        let mut pool = FramePool::new(2, 2, PixelFormat::Rgba32, 4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let handle = bridge.register_callback(move |result| {
            sink.lock().unwrap().push(result.frame_id());
        });
        assert!(bridge.has_callback());

        bridge.submit(filled_frame(&mut pool, 200, 1), None).unwrap();
        bridge.submit(filled_frame(&mut pool, 200, 2), None).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        handle.unregister();
        assert!(!bridge.has_callback());

        bridge.submit(filled_frame(&mut pool, 200, 3), None).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while (bridge.stats().completed() < 3 || bridge.stats().in_flight() > 0)
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.lock().unwrap().len(), 2);
        // Undelivered results are released, not leaked
        assert_eq!(bridge.stats().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_initialize() {
        let result = InferenceBridge::start(FailingInit).await;
        assert!(matches!(result, Err(InferenceError::Initialize(_))));
    }

    #[tokio::test]
    async fn test_gpu_context_requires_engine_support() {
        let bridge = InferenceBridge::start(EchoSegmenter).await.unwrap();
        assert!(bridge.acquire_gpu_context().is_none());

        let bridge = InferenceBridge::start(LumaSegmenter::new(0.5, 0.1).with_gpu_sharing(true))
            .await
            .unwrap();
        let ctx = bridge.acquire_gpu_context().unwrap();
        assert_eq!(ctx.engine(), "luma");
        assert_eq!(bridge.stats().gpu_contexts(), 1);
        drop(ctx);
        assert_eq!(bridge.stats().gpu_contexts(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let mut bridge = InferenceBridge::start(EchoSegmenter).await.unwrap();
        let mut pool = FramePool::new(2, 2, PixelFormat::Rgba32, 1);
        bridge.shutdown();

        let err = bridge
            .submit(filled_frame(&mut pool, 1, 1), None)
            .unwrap_err();
        assert_eq!(err, InferenceError::Disconnected);
        assert_eq!(bridge.stats().in_flight(), 0);
    }
}
