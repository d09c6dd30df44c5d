//! Maskcast - live video segmentation pipeline
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use maskcast::{
    config::Config,
    inference::{prepare_engine, LumaSegmenter},
    mask::{MaskPublisher, MaskUpdate},
    pipeline::{ExecutionMode, FramePipeline, PipelineStatus},
    source::{prepare_source, TestPatternSource},
};

/// Log mask coverage every this many updates
const COVERAGE_LOG_INTERVAL: u64 = 60;

/// Maskcast - live video segmentation pipeline
#[derive(Parser, Debug)]
#[command(name = "maskcast", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Result delivery mode: async or sync (overrides config)
    #[arg(short, long)]
    mode: Option<ExecutionMode>,

    /// Frame width (overrides config)
    #[arg(long)]
    width: Option<u32>,

    /// Frame height (overrides config)
    #[arg(long)]
    height: Option<u32>,

    /// Copy frames on the GPU instead of reading them back
    #[arg(long)]
    gpu_copy: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", maskcast::NAME, maskcast::VERSION);

    let config = load_config(&args)?;
    let duration = match args.duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => anyhow::bail!("Invalid duration: {}", secs),
        None => None,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let status = runtime.block_on(run(config, duration))?;

    match status {
        PipelineStatus::Stopped(reason) if reason.is_fatal() => {
            anyhow::bail!("Pipeline failed: {:?}", reason)
        }
        PipelineStatus::Stopped(_) => {
            info!("Maskcast stopped");
            Ok(())
        }
        other => anyhow::bail!("Pipeline never started (status: {:?})", other),
    }
}

/// Load config and apply CLI overrides
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    if let Some(mode) = args.mode {
        config.pipeline.mode = mode;
    }
    if let Some(width) = args.width {
        config.source.width = width;
    }
    if let Some(height) = args.height {
        config.source.height = height;
    }
    if args.gpu_copy {
        config.source.gpu_copy = true;
        config.inference.share_gpu_context = true;
    }

    config.validate()?;

    info!(
        "Source: {}x{} {} @ {} fps",
        config.source.width, config.source.height, config.source.format, config.source.fps
    );
    info!(
        "Pipeline: {} mode, pool of {}",
        config.pipeline.mode, config.pipeline.pool_capacity
    );

    Ok(config)
}

async fn run(config: Config, duration: Option<Duration>) -> anyhow::Result<PipelineStatus> {
    let publisher = Arc::new(MaskPublisher::new(
        config.source.width,
        config.source.height,
        config.publisher.channel_capacity,
    ));

    let (pipeline, notifier, handle) =
        FramePipeline::<TestPatternSource>::new(&config.pipeline, Arc::clone(&publisher));
    let pipeline_task = tokio::spawn(pipeline.run());
    let monitor_task = tokio::spawn(monitor_masks(publisher.subscribe()));

    // Start both components concurrently; the pipeline joins them in whatever order they land
    let source = TestPatternSource::from_config(&config.source);
    let source_task = tokio::spawn(prepare_source(source, notifier.clone()));
    let engine = LumaSegmenter::from_config(&config.inference);
    let engine_task = tokio::spawn(prepare_engine(engine, notifier));

    for (what, task) in [("image source", source_task), ("inference engine", engine_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to start {}: {}", what, e),
            Err(e) => error!("{} startup task failed: {}", what, e),
        }
    }

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        _ = run_for(duration) => info!("Run duration elapsed"),
        status = handle.wait_for(|s| matches!(s, PipelineStatus::Stopped(_))) => {
            warn!("Pipeline ended on its own: {:?}", status);
        }
    }

    handle.stop();
    let status = pipeline_task.await?;
    monitor_task.abort();

    let stats = handle.stats();
    info!(
        "Frames: {} ticks, {} submitted, {} skipped (pool exhausted), {} dropped",
        stats.ticks, stats.submitted, stats.skipped, stats.dropped
    );

    Ok(status)
}

/// Log foreground coverage of published masks
async fn monitor_masks(mut updates: broadcast::Receiver<MaskUpdate>) {
    let mut received: u64 = 0;

    loop {
        match updates.recv().await {
            Ok(update) => {
                received += 1;
                if received % COVERAGE_LOG_INTERVAL == 1 {
                    let coverage = update
                        .array
                        .read()
                        .map(|array| array.coverage())
                        .unwrap_or(0.0);
                    info!(
                        "Mask {} ({}x{}): {:.1}% foreground",
                        update.frame_id,
                        update.width,
                        update.height,
                        coverage * 100.0
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("Mask monitor lagged, skipped {} updates", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
