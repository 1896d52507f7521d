//! Error taxonomy for the build run.
//!
//! Every variant is fatal to the whole run: errors are caught at the
//! single-job boundary just long enough to log the failing scene, then
//! propagated up to the driver, which maps them to a non-zero exit code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Rejected repository URL or clone subprocess failure.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// Missing or corrupt scene manifest, or a manifest without `main`.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Compiler or installer subprocess exited non-zero. The message
    /// carries captured stdout/stderr where the invocation captured it.
    #[error("build failed: {0}")]
    Build(String),

    /// The declared artifact is absent after an apparently successful
    /// build. Reported separately from a compiler failure.
    #[error("artifact verification failed: {0}")]
    Verification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Broken internal invariant (e.g. sandbox pool bookkeeping).
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
