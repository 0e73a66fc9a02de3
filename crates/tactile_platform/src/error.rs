//! Platform error types

use thiserror::Error;

/// Platform-related errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The stylus worker thread could not be started
    #[error("Failed to start stylus worker: {0}")]
    StylusSpawn(String),

    /// The stylus worker thread panicked while being joined
    #[error("Stylus worker terminated abnormally")]
    StylusPanicked,

    /// A stylus worker is already feeding this queue
    #[error("Stylus worker already running")]
    StylusRunning,
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;
