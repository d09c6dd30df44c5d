//! Maskcast - live video segmentation pipeline
//!
//! A Rust service that:
//! - Pulls frames from an image source into a bounded buffer pool
//! - Hands them to a segmentation engine running on its own worker thread,
//!   with callback-driven or awaited result delivery
//! - Publishes the resulting foreground mask as a normalized `f32` array
//! - Derives lower-leg joint orientation from tracked pose landmarks

pub mod config;
pub mod error;
pub mod frame;
pub mod inference;
pub mod joint;
pub mod mask;
pub mod pipeline;
pub mod source;

pub use config::Config;
pub use error::{MaskcastError, Result};
pub use pipeline::{ExecutionMode, FramePipeline, PipelineHandle, PipelineStatus, StopReason};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
