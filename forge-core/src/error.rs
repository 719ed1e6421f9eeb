//! Error types for FORGE.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.
//! Fatal errors abort the generation run; per-input resolution failures are
//! collected into a [`ResolutionErrors`] aggregate instead (see `resolve`).

use crate::resolve::ResolutionErrors;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for FORGE operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Main error type for FORGE.
#[derive(Error, Debug)]
pub enum ForgeError {
    // Reference errors
    #[error("invalid image reference {value:?}: {reason}")]
    InvalidReference { value: String, reason: String },

    #[error("invalid source repository {location:?}: {reason}")]
    InvalidRepository { location: String, reason: String },

    // Strategy conflicts: contradictory user intent, never recoverable
    #[error("when directly referencing a Dockerfile, the build strategy must be 'docker'")]
    StrategyConflict,

    #[error("a Dockerfile cannot be used with multiple source repositories")]
    DockerfileWithMultipleRepositories,

    #[error("the Dockerfile in the repository {repository:?} has no FROM instruction")]
    MissingFromInstruction { repository: String },

    #[error("invalid Dockerfile: {reason}")]
    InvalidDockerfile { reason: String },

    // Build output errors
    #[error(
        "output image of {reference:?} should be different than input, \
         please specify a different output reference with --to"
    )]
    CircularOutputReference { reference: String },

    #[error("invalid output reference {value:?}: {reason}")]
    InvalidOutputReference { value: String, reason: String },

    // Aggregated per-input resolution failures
    #[error(transparent)]
    Resolution(#[from] ResolutionErrors),

    // Detection errors
    #[error("unable to inspect source repository {location:?}: {reason}")]
    DetectionFailed { location: String, reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeError {
    /// True when the error must abort the run instead of being aggregated.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ForgeError::Resolution(_))
    }
}
