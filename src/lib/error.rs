//! Error types for the entrypoint wrapper.
//!
//! Child failures are not errors: they travel as an [`Outcome`](crate::Outcome)
//! and end up in the marker file. Everything here is a fault of the wrapper's
//! own configuration or environment.

use std::io;
use std::path::PathBuf;

/// Errors produced by the entrypoint wrapper.
#[derive(Debug, thiserror::Error)]
pub enum EntrypointError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("malformed options JSON: {0}")]
    InvalidOptionsJson(#[from] serde_json::Error),

    #[error("could not read previous marker {}: {reason}", .path.display())]
    MarkerRead { path: PathBuf, reason: String },

    #[error("gave up waiting for previous marker {}", .path.display())]
    MarkerTimeout { path: PathBuf },

    #[error("could not write marker {}: {source}", .path.display())]
    MarkerWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copy mode failed for {}: {source}", .path.display())]
    CopyMode {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not create artifact directory {}: {source}", .path.display())]
    ArtifactDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("interrupted while waiting for the previous marker")]
    Interrupted,

    #[error("waiting on child process failed: {0}")]
    Wait(#[source] io::Error),
}

impl EntrypointError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        EntrypointError::Configuration(message.into())
    }
}

/// Result type for entrypoint operations.
pub type Result<T> = std::result::Result<T, EntrypointError>;
