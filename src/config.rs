//! Configuration parsing and management for Maskcast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, MaskcastError};
use crate::frame::PixelFormat;
use crate::pipeline::ExecutionMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub inference: InferenceConfig,
    pub publisher: PublisherConfig,
    pub solver: SolverConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MaskcastError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, MaskcastError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, MaskcastError> {
        let paths = [
            PathBuf::from("maskcast.toml"),
            PathBuf::from("config/maskcast.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), MaskcastError> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(invalid(
                "source.width/height",
                "Source dimensions must be greater than 0",
            ));
        }

        if self.source.fps <= 0.0 {
            return Err(invalid("source.fps", "Frame rate must be greater than 0"));
        }

        if self.pipeline.pool_capacity == 0 {
            return Err(invalid(
                "pipeline.pool_capacity",
                "Pool needs room for at least one frame",
            ));
        }

        if self.pipeline.tick_rate_hz <= 0.0 {
            return Err(invalid(
                "pipeline.tick_rate_hz",
                "Tick rate must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.inference.threshold) {
            return Err(invalid(
                "inference.threshold",
                "Threshold must be between 0.0 and 1.0",
            ));
        }

        if self.inference.softness < 0.0 {
            return Err(invalid(
                "inference.softness",
                "Softness must not be negative",
            ));
        }

        if self.publisher.channel_capacity == 0 {
            return Err(invalid(
                "publisher.channel_capacity",
                "Broadcast channel capacity must be greater than 0",
            ));
        }

        if self.solver.degenerate_epsilon <= 0.0 {
            return Err(invalid(
                "solver.degenerate_epsilon",
                "Epsilon must be greater than 0",
            ));
        }

        if self.source.gpu_copy && !self.inference.share_gpu_context {
            tracing::warn!(
                "source.gpu_copy is set but the engine does not share a GPU context; \
                 frames will use host readback"
            );
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> MaskcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Image source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Capture frame rate
    pub fps: f64,
    /// Pixel layout produced by the source
    pub format: PixelFormat,
    /// Whether the source can copy frames without a host round-trip
    pub gpu_copy: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            format: PixelFormat::Rgba32,
            gpu_copy: false,
        }
    }
}

/// Frame pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Result delivery discipline
    pub mode: ExecutionMode,
    /// Number of frame buffers the pool may allocate
    pub pool_capacity: usize,
    /// Frame boundary rate used for pacing and backoff
    pub tick_rate_hz: f64,
    /// Pixel layout handed to the engine
    pub format: PixelFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Asynchronous,
            pool_capacity: 10,
            tick_rate_hz: 60.0,
            format: PixelFormat::Rgba32,
        }
    }
}

/// Inference engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Luminance threshold separating foreground from background (0.0 - 1.0)
    pub threshold: f32,
    /// Width of the soft edge around the threshold
    pub softness: f32,
    /// Simulated per-frame latency in milliseconds
    pub latency_ms: u64,
    /// Whether the engine can share the render GPU context
    pub share_gpu_context: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            softness: 0.1,
            latency_ms: 0,
            share_gpu_context: false,
        }
    }
}

/// Mask publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Broadcast channel capacity (lagging subscribers skip updates)
    pub channel_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4,
        }
    }
}

/// Joint solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Squared length below which a landmark vector counts as degenerate
    pub degenerate_epsilon: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            degenerate_epsilon: 1e-10,
        }
    }
}

/// Get the platform-specific config directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("maskcast");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/maskcast");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/maskcast");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("maskcast");
        }
    }

    PathBuf::from(".")
}
