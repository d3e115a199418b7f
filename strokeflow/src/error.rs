//! Error types.
//!
//! Admission failures are ordinary control flow (the job is retried on the
//! next drain) and never surface here. Only genuine caller-facing failures
//! get an error variant.

use thiserror::Error;

/// Errors returned by the stroke scheduling engine.
#[derive(Debug, Error)]
pub enum StrokeError {
    /// A job was added to a stroke that has already been ended.
    #[error("job rejected: stroke has already been ended")]
    StrokeEnded,

    /// The fixed-capacity worker pool could not be constructed.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
