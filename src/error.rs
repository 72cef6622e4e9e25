//! Error types shared across the pipeline.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures surfaced by pipeline construction and rendering.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An operation that needs a built pipeline was called while none exists.
    #[error("pipeline has not been built")]
    NotBuilt,

    /// Parameter derivation rejected the supplied configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A slice call reached a stage whose FFT context was sized for a
    /// different window. Non-recoverable; the build must be redone.
    #[error("window size mismatch: stage initialised for {expected}, call used {actual}")]
    WindowMismatch { expected: usize, actual: usize },

    /// The sample source failed in a way that aborts the whole build
    /// (per-slice read failures degrade the slice instead).
    #[error("sample source failed: {0}")]
    Source(String),

    #[error("audio file error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
