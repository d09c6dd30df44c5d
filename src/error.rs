//! Error types for Maskcast

use thiserror::Error;

/// Main error type for Maskcast
#[derive(Error, Debug)]
pub enum MaskcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Image source error: {0}")]
    Source(#[from] SourceError),

    #[error("Readback error: {0}")]
    Readback(#[from] ReadbackError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Image source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to start image source: {0}")]
    Start(String),

    #[error("Image source did not become ready: {0}")]
    NotPrepared(String),
}

/// Frame copy / readback errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadbackError {
    #[error("Frame size mismatch: buffer is {expected:?}, frame is {actual:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Short frame: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },

    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// Inference bridge errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Failed to spawn inference worker: {0}")]
    WorkerSpawn(String),

    #[error("Engine initialization failed: {0}")]
    Initialize(String),

    #[error("Engine failed to process frame: {0}")]
    Segment(String),

    #[error("Inference worker disconnected")]
    Disconnected,

    #[error("Pending result was dropped before completion")]
    ResultDropped,
}

/// Result type alias for Maskcast operations
pub type Result<T> = std::result::Result<T, MaskcastError>;
