use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors that abort a test case. The pipeline never produces partial results
/// after one of these.
#[derive(Debug, Error)]
pub enum RunError {
    /// The test case itself is malformed.
    #[error("{0}")]
    Configuration(String),

    #[error("Decoder '{0}' not found.")]
    DecoderNotFound(String),

    #[error("Failed to stack decoder instances: {0}")]
    Stacking(String),

    /// The capture could not be loaded or the session could not be started.
    #[error("{0}")]
    Acquisition(String),
}

impl RunError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition(msg.into())
    }
}

/// Writing a matched record to the output sink failed. The run continues.
#[derive(Debug, Error)]
#[error("output write failure: {0}")]
pub struct DispatchWriteError(#[from] pub io::Error);

/// Coverage problems. None of these change the test verdict.
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("Failed to start coverage: {0}")]
    Start(String),

    #[error("Failed to stop coverage: {0}")]
    Stop(String),

    #[error("Invalid result from coverage of '{}': {reason}", file.display())]
    Query { file: PathBuf, reason: String },

    #[error("Invalid module path '{}': {source}", path.display())]
    ModulePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to make coverage report: {0}")]
    Report(String),
}
