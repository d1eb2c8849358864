//! Error types for Framecast.

use thiserror::Error;

/// Main error type for Framecast operations.
#[derive(Error, Debug)]
pub enum FramecastError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid format/flag/capability combination, detected at
    /// construction time. Construction is refused, never downgraded.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `pop_frame` called past end-of-stream.
    #[error("stream exhausted: {0}")]
    StreamExhausted(String),

    /// Shader or compute failure. Fatal to the owning composition; see
    /// the dispatch failure-scope contract for whether it is fatal to
    /// the whole dispatch.
    #[error("GPU execution error: {0}")]
    GpuExecution(String),

    /// Out-of-range decoded sample or size/format mismatch during
    /// comparison. Verification-layer only.
    #[error("data validation error: {0}")]
    DataValidation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for Framecast operations.
pub type Result<T> = std::result::Result<T, FramecastError>;
