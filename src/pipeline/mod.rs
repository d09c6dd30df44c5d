//! Frame pipeline
//!
//! Joins an image source and an inference engine delivered over a readiness
//! channel, then drives acquire -> copy -> submit -> publish once per frame
//! until stopped.
//!
//! Status and stop requests travel over `tokio::sync::watch` channels exposed
//! through [`PipelineHandle`].

pub mod delivery;
pub mod pool;
pub mod readback;

pub use delivery::ResultDelivery;
pub use pool::{FramePool, PooledFrame};
pub use readback::{CopyStrategy, FrameClock, ReadbackAdapter};

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::config::PipelineConfig;
use crate::error::InferenceError;
use crate::frame::PixelFormat;
use crate::inference::{GpuContext, InferenceBridge};
use crate::mask::MaskPublisher;
use crate::source::ImageSource;

/// Result delivery discipline, fixed for the pipeline's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Fire-and-forget submission; results arrive through a callback
    #[serde(alias = "async")]
    Asynchronous,
    /// Each submission is awaited before the next frame is taken
    #[serde(alias = "sync")]
    Synchronous,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "async" | "asynchronous" => Ok(ExecutionMode::Asynchronous),
            "sync" | "synchronous" => Ok(ExecutionMode::Synchronous),
            other => Err(format!(
                "unknown execution mode '{}' (expected async or sync)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Asynchronous => write!(f, "async"),
            ExecutionMode::Synchronous => write!(f, "sync"),
        }
    }
}

/// Why a running pipeline stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    ReadbackFailed(String),
    EngineDisconnected,
}

impl StopReason {
    /// Whether the stop was caused by a failure rather than a request
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StopReason::Requested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Waiting for the source and the engine
    Idle,
    Running,
    Stopped(StopReason),
}

/// Component announcement sent over the readiness channel
pub enum ReadySignal<S> {
    Source(S),
    Engine(InferenceBridge),
}

/// Sending side of the readiness channel
pub struct ReadyNotifier<S> {
    tx: mpsc::Sender<ReadySignal<S>>,
}

impl<S> Clone for ReadyNotifier<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> ReadyNotifier<S> {
    /// Hand a started source to the pipeline. Returns `false` if the pipeline is gone.
    pub async fn source_ready(&self, source: S) -> bool {
        self.tx.send(ReadySignal::Source(source)).await.is_ok()
    }

    /// Hand a running engine to the pipeline. Returns `false` if the pipeline is gone.
    pub async fn engine_ready(&self, bridge: InferenceBridge) -> bool {
        self.tx.send(ReadySignal::Engine(bridge)).await.is_ok()
    }
}

#[derive(Debug, Default)]
struct PipelineCounters {
    ticks: AtomicU64,
    skipped: AtomicU64,
    submitted: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks: u64,
    /// Ticks skipped because every pooled buffer was in use
    pub skipped: u64,
    pub submitted: u64,
    /// Frames dropped after a failed GPU-resident copy
    pub dropped: u64,
}

/// Control handle for a pipeline; cheap to clone
#[derive(Clone)]
pub struct PipelineHandle {
    status_rx: watch::Receiver<PipelineStatus>,
    stop_tx: Arc<watch::Sender<bool>>,
    counters: Arc<PipelineCounters>,
}

impl PipelineHandle {
    pub fn status(&self) -> PipelineStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait until the status satisfies `predicate`. If the pipeline is gone,
    /// returns its final status instead.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&PipelineStatus) -> bool,
    ) -> PipelineStatus {
        let mut rx = self.status_rx.clone();
        let result = rx.wait_for(predicate).await.map(|s| s.clone());
        match result {
            Ok(status) => status,
            Err(_) => rx.borrow().clone(),
        }
    }

    /// Ask the pipeline to stop after the current step
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Resolves once a stop is requested; never resolves if no one can request one
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let requested = stop_rx.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

/// Orchestrates one source and one engine
pub struct FramePipeline<S> {
    mode: ExecutionMode,
    pool_capacity: usize,
    format: PixelFormat,
    tick: Duration,
    publisher: Arc<MaskPublisher>,
    ready_rx: mpsc::Receiver<ReadySignal<S>>,
    status_tx: watch::Sender<PipelineStatus>,
    stop_rx: watch::Receiver<bool>,
    counters: Arc<PipelineCounters>,
}

impl<S: ImageSource> FramePipeline<S> {
    pub fn new(
        config: &PipelineConfig,
        publisher: Arc<MaskPublisher>,
    ) -> (Self, ReadyNotifier<S>, PipelineHandle) {
        let (ready_tx, ready_rx) = mpsc::channel(2);
        let (status_tx, status_rx) = watch::channel(PipelineStatus::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(PipelineCounters::default());

        let tick = if config.tick_rate_hz > 0.0 {
            Duration::from_secs_f64(1.0 / config.tick_rate_hz)
        } else {
            Duration::from_millis(16)
        };

        let pipeline = Self {
            mode: config.mode,
            pool_capacity: config.pool_capacity,
            format: config.format,
            tick,
            publisher,
            ready_rx,
            status_tx,
            stop_rx,
            counters: Arc::clone(&counters),
        };

        let handle = PipelineHandle {
            status_rx,
            stop_tx: Arc::new(stop_tx),
            counters,
        };

        (pipeline, ReadyNotifier { tx: ready_tx }, handle)
    }

    /// Run until stopped and return the final status
    pub async fn run(mut self) -> PipelineStatus {
        let Some((source, bridge)) = self.wait_until_ready().await else {
            return self.status_tx.borrow().clone();
        };

        let mut session = Session::open(&self, source, bridge);
        self.status_tx.send_replace(PipelineStatus::Running);
        tracing::info!(
            "Frame pipeline running ({} mode, {})",
            session.delivery.mode(),
            session.adapter.strategy()
        );

        let mut stop_rx = self.stop_rx.clone();
        let reason = loop {
            let step = tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => break StopReason::Requested,
                step = session.step() => step,
            };

            if let Err(reason) = step {
                break reason;
            }
        };

        if reason.is_fatal() {
            tracing::error!("Frame pipeline stopped: {:?}", reason);
        } else {
            tracing::info!("Frame pipeline stop requested");
        }

        session.close().await;

        let status = PipelineStatus::Stopped(reason);
        self.status_tx.send_replace(status.clone());
        status
    }

    /// Collect a prepared source and an engine, in either order
    async fn wait_until_ready(&mut self) -> Option<(S, InferenceBridge)> {
        let mut source: Option<S> = None;
        let mut engine: Option<InferenceBridge> = None;

        loop {
            if source.is_some() && engine.is_some() {
                return source.zip(engine);
            }

            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop_rx) => {
                    tracing::info!("Frame pipeline stopped before it started");
                    self.status_tx
                        .send_replace(PipelineStatus::Stopped(StopReason::Requested));
                    return None;
                }
                signal = self.ready_rx.recv() => match signal {
                    Some(ReadySignal::Source(s)) if s.is_prepared() => {
                        tracing::debug!("Image source joined the pipeline");
                        source = Some(s);
                    }
                    Some(ReadySignal::Source(_)) => {
                        tracing::warn!("Ignoring image source that is not prepared");
                    }
                    Some(ReadySignal::Engine(bridge)) => {
                        tracing::debug!("Inference engine '{}' joined the pipeline", bridge.name());
                        engine = Some(bridge);
                    }
                    None => {
                        tracing::warn!(
                            "Readiness channel closed (source: {}, engine: {}); pipeline stays idle",
                            source.is_some(),
                            engine.is_some()
                        );
                        return None;
                    }
                },
            }
        }
    }
}

/// Everything a running pipeline owns
struct Session<S> {
    source: S,
    bridge: InferenceBridge,
    gpu: Option<GpuContext>,
    pool: FramePool,
    adapter: ReadbackAdapter,
    clock: FrameClock,
    delivery: ResultDelivery,
    counters: Arc<PipelineCounters>,
}

impl<S: ImageSource> Session<S> {
    fn open(pipeline: &FramePipeline<S>, source: S, bridge: InferenceBridge) -> Self {
        let gpu = if source.supports_gpu_copy() {
            bridge.acquire_gpu_context()
        } else {
            None
        };
        let strategy = match gpu {
            Some(_) => CopyStrategy::GpuResident,
            None => CopyStrategy::HostReadback,
        };
        tracing::debug!(
            "Copy strategy: {} (source GPU copy: {}, engine shares context: {})",
            strategy,
            source.supports_gpu_copy(),
            bridge.shares_gpu_context()
        );

        let pool = FramePool::new(
            source.width(),
            source.height(),
            pipeline.format,
            pipeline.pool_capacity,
        );
        let delivery =
            ResultDelivery::attach(pipeline.mode, &bridge, Arc::clone(&pipeline.publisher));

        Self {
            source,
            bridge,
            gpu,
            pool,
            adapter: ReadbackAdapter::new(strategy),
            clock: FrameClock::new(pipeline.tick),
            delivery,
            counters: Arc::clone(&pipeline.counters),
        }
    }

    /// One frame. `Err` carries the reason the pipeline has to stop.
    async fn step(&mut self) -> Result<(), StopReason> {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        tracing::trace!("Acquiring frame buffer");
        let Some(frame) = self.pool.try_acquire() else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Frame pool exhausted, waiting a frame");
            self.clock.end_of_frame().await;
            return Ok(());
        };

        tracing::trace!("Copying frame");
        let frame = match self.adapter.copy(&self.source, frame, &mut self.clock).await {
            Ok(frame) => frame,
            Err(e) if self.adapter.strategy() == CopyStrategy::GpuResident => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping frame after GPU copy failed: {}", e);
                return Ok(());
            }
            Err(e) => return Err(StopReason::ReadbackFailed(e.to_string())),
        };

        let frame_id = frame.frame_id();
        tracing::trace!("Submitting frame {}", frame_id);
        match self
            .delivery
            .submit(&self.bridge, frame, self.gpu.as_ref())
            .await
        {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Frame {} handed off", frame_id);
                Ok(())
            }
            Err(e @ (InferenceError::Disconnected | InferenceError::ResultDropped)) => {
                tracing::error!("Lost inference engine '{}': {}", self.bridge.name(), e);
                Err(StopReason::EngineDisconnected)
            }
            Err(e) => {
                tracing::warn!("Frame {} not processed: {}", frame_id, e);
                Ok(())
            }
        }
    }

    /// Tear down in dependency order
    async fn close(self) {
        let Session {
            mut source,
            bridge,
            gpu,
            pool,
            delivery,
            ..
        } = self;

        delivery.detach();
        drop(pool);
        drop(gpu);
        source.stop();
        drop(source);

        // Joining the worker blocks until its queue is drained
        let name = bridge.name().to_string();
        let joined = tokio::task::spawn_blocking(move || {
            let mut bridge = bridge;
            bridge.shutdown();
        })
        .await;
        if let Err(e) = joined {
            tracing::error!("Failed to shut down inference engine '{}': {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::frame::{FrameBuffer, FrameHandle};
    use crate::inference::{BridgeStats, SegmentationMask, Segmenter};
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct ScriptedSource {
        width: u32,
        height: u32,
        prepared: bool,
        gpu_copy: bool,
        /// Bytes missing from every frame
        short_by: usize,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                width: 4,
                height: 4,
                prepared: true,
                gpu_copy: false,
                short_by: 0,
            }
        }
    }

    impl ImageSource for ScriptedSource {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn format(&self) -> PixelFormat {
            PixelFormat::Rgba32
        }

        fn is_prepared(&self) -> bool {
            self.prepared
        }

        fn supports_gpu_copy(&self) -> bool {
            self.gpu_copy
        }

        fn current_frame(&self) -> FrameHandle {
            let len = (self.width * self.height * 4) as usize - self.short_by;
            FrameHandle::new(self.width, self.height, PixelFormat::Rgba32, vec![200u8; len])
        }

        async fn play(&mut self) -> Result<(), SourceError> {
            self.prepared = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.prepared = false;
        }
    }

    /// Counts calls and optionally takes its time
    struct CountingSegmenter {
        calls: Arc<AtomicUsize>,
        latency: Duration,
        shares_gpu: bool,
    }

    impl CountingSegmenter {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                calls,
                latency: Duration::ZERO,
                shares_gpu: false,
            }
        }
    }

    impl Segmenter for CountingSegmenter {
        fn name(&self) -> &str {
            "counting"
        }

        fn shares_gpu_context(&self) -> bool {
            self.shares_gpu
        }

        fn segment(
            &mut self,
            frame: &FrameBuffer,
            _gpu_resident: bool,
        ) -> Result<Option<SegmentationMask>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.latency);
            let count = (frame.width() * frame.height()) as usize;
            Ok(SegmentationMask::from_f32(
                frame.width(),
                frame.height(),
                vec![1.0; count],
            ))
        }
    }

    fn config(mode: ExecutionMode) -> PipelineConfig {
        PipelineConfig {
            mode,
            pool_capacity: 4,
            tick_rate_hz: 500.0,
            format: PixelFormat::Rgba32,
        }
    }

    async fn start_bridge(engine: CountingSegmenter) -> (InferenceBridge, Arc<BridgeStats>) {
        let bridge = InferenceBridge::start(engine).await.unwrap();
        let stats = bridge.stats();
        (bridge, stats)
    }

    fn spawn_pipeline(
        mode: ExecutionMode,
    ) -> (
        tokio::task::JoinHandle<PipelineStatus>,
        ReadyNotifier<ScriptedSource>,
        PipelineHandle,
        Arc<MaskPublisher>,
    ) {
        let publisher = Arc::new(MaskPublisher::new(4, 4, 16));
        let (pipeline, notifier, handle) =
            FramePipeline::<ScriptedSource>::new(&config(mode), Arc::clone(&publisher));
        (tokio::spawn(pipeline.run()), notifier, handle, publisher)
    }

    async fn wait_running(handle: &PipelineHandle) {
        let status = timeout(WAIT, handle.wait_for(|s| *s != PipelineStatus::Idle))
            .await
            .expect("pipeline did not start");
        assert_eq!(status, PipelineStatus::Running);
    }

    #[test]
    fn test_execution_mode_parse() {
        assert_eq!("sync".parse::<ExecutionMode>(), Ok(ExecutionMode::Synchronous));
        assert_eq!(
            "Asynchronous".parse::<ExecutionMode>(),
            Ok(ExecutionMode::Asynchronous)
        );
        assert!("sometimes".parse::<ExecutionMode>().is_err());
        assert_eq!(ExecutionMode::Synchronous.to_string(), "sync");
    }

    #[tokio::test]
    async fn test_starts_after_source_then_engine() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Synchronous);
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(notifier.source_ready(ScriptedSource::new()).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status(), PipelineStatus::Idle);

        let (bridge, _) = start_bridge(CountingSegmenter::new(Arc::clone(&calls))).await;
        assert!(notifier.engine_ready(bridge).await);
        wait_running(&handle).await;

        handle.stop();
        let status = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(status, PipelineStatus::Stopped(StopReason::Requested));
    }

    #[tokio::test]
    async fn test_starts_after_engine_then_source() {
        let (task, notifier, handle, publisher) = spawn_pipeline(ExecutionMode::Synchronous);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut updates = publisher.subscribe();

        let (bridge, _) = start_bridge(CountingSegmenter::new(Arc::clone(&calls))).await;
        assert!(notifier.engine_ready(bridge).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status(), PipelineStatus::Idle);

        assert!(notifier.source_ready(ScriptedSource::new()).await);
        wait_running(&handle).await;

        let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        assert_eq!((update.width, update.height), (4, 4));

        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(calls.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_unprepared_source_is_ignored() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Synchronous);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut cold = ScriptedSource::new();
        cold.prepared = false;
        notifier.source_ready(cold).await;
        let (bridge, _) = start_bridge(CountingSegmenter::new(calls)).await;
        notifier.engine_ready(bridge).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status(), PipelineStatus::Idle);

        notifier.source_ready(ScriptedSource::new()).await;
        wait_running(&handle).await;

        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_startup_stays_idle() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Asynchronous);

        notifier.source_ready(ScriptedSource::new()).await;
        drop(notifier);

        let status = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(status, PipelineStatus::Idle);
        assert_eq!(handle.status(), PipelineStatus::Idle);
    }

    #[tokio::test]
    async fn test_stop_while_idle() {
        let (task, _notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Asynchronous);

        handle.stop();
        let status = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(status, PipelineStatus::Stopped(StopReason::Requested));
    }

    #[tokio::test]
    async fn test_synchronous_mode_one_frame_in_flight() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Synchronous);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = CountingSegmenter::new(Arc::clone(&calls));
        engine.latency = Duration::from_millis(10);

        let (bridge, stats) = start_bridge(engine).await;
        notifier.engine_ready(bridge).await;
        notifier.source_ready(ScriptedSource::new()).await;
        wait_running(&handle).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();

        assert!(stats.completed() >= 2, "expected several frames to complete");
        assert_eq!(stats.peak_in_flight(), 1);
        assert_eq!(stats.in_flight(), 0);
        assert_eq!(handle.stats().skipped, 0);
    }

    #[tokio::test]
    async fn test_asynchronous_mode_outruns_engine() {
        let (task, notifier, handle, publisher) = spawn_pipeline(ExecutionMode::Asynchronous);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = CountingSegmenter::new(Arc::clone(&calls));
        engine.latency = Duration::from_millis(30);
        let mut updates = publisher.subscribe();

        let (bridge, stats) = start_bridge(engine).await;
        notifier.source_ready(ScriptedSource::new()).await;
        notifier.engine_ready(bridge).await;
        wait_running(&handle).await;

        // Results still reach the publisher through the callback
        timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();

        assert!(stats.peak_in_flight() > 1);
        // Pool of 4 fills up while the engine lags
        assert!(handle.stats().skipped > 0);
        // Queue drained on shutdown, nothing left leased
        assert_eq!(stats.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stop_discards_queued_results() {
        let (task, notifier, handle, publisher) = spawn_pipeline(ExecutionMode::Asynchronous);
        let mut engine = CountingSegmenter::new(Arc::new(AtomicUsize::new(0)));
        engine.latency = Duration::from_millis(40);
        let mut updates = publisher.subscribe();

        let (bridge, stats) = start_bridge(engine).await;
        notifier.source_ready(ScriptedSource::new()).await;
        notifier.engine_ready(bridge).await;
        wait_running(&handle).await;

        timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        let mut published = 1;
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop();
        let status = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(status, PipelineStatus::Stopped(StopReason::Requested));

        // The worker has been joined: every queued frame went through the engine
        assert_eq!(stats.completed(), stats.submitted());
        while updates.try_recv().is_ok() {
            published += 1;
        }

        // Frames still queued at stop were segmented but never published
        assert!(
            published + 1 < stats.completed(),
            "published {} of {} completed frames",
            published,
            stats.completed()
        );
        assert_eq!(stats.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_host_readback_failure_is_fatal() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Asynchronous);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut broken = ScriptedSource::new();
        broken.short_by = 4;
        let (bridge, stats) = start_bridge(CountingSegmenter::new(Arc::clone(&calls))).await;
        notifier.source_ready(broken).await;
        notifier.engine_ready(bridge).await;

        let status = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(
            status,
            PipelineStatus::Stopped(StopReason::ReadbackFailed(_))
        ));
        assert_eq!(handle.status(), status);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(stats.submitted(), 0);
    }

    #[tokio::test]
    async fn test_gpu_copy_holds_and_releases_context() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Synchronous);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = CountingSegmenter::new(Arc::clone(&calls));
        engine.shares_gpu = true;

        let mut source = ScriptedSource::new();
        source.gpu_copy = true;
        let (bridge, stats) = start_bridge(engine).await;
        notifier.source_ready(source).await;
        notifier.engine_ready(bridge).await;
        wait_running(&handle).await;

        assert_eq!(stats.gpu_contexts(), 1);
        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(stats.gpu_contexts(), 0);
    }

    #[tokio::test]
    async fn test_gpu_copy_mismatch_drops_frame() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Synchronous);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = CountingSegmenter::new(Arc::clone(&calls));
        engine.shares_gpu = true;

        let mut source = ScriptedSource::new();
        source.gpu_copy = true;
        source.short_by = 4;
        let (bridge, _) = start_bridge(engine).await;
        notifier.source_ready(source).await;
        notifier.engine_ready(bridge).await;
        wait_running(&handle).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status(), PipelineStatus::Running);
        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();

        assert!(handle.stats().dropped > 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shares_gpu_engine_without_source_support_uses_host() {
        let (task, notifier, handle, _publisher) = spawn_pipeline(ExecutionMode::Synchronous);
        let mut engine = CountingSegmenter::new(Arc::new(AtomicUsize::new(0)));
        engine.shares_gpu = true;

        let (bridge, stats) = start_bridge(engine).await;
        notifier.source_ready(ScriptedSource::new()).await;
        notifier.engine_ready(bridge).await;
        wait_running(&handle).await;

        assert_eq!(stats.gpu_contexts(), 0);
        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
    }
}
