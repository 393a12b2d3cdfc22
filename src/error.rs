//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Two layers:
//! - [`ToolError`] is what a stage collaborator reports (spawn failure, bad exit).
//! - [`SvError`] is what the pipeline surfaces; tool errors are wrapped together
//!   with the [`StageId`] that was executing.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipelines::stages::StageId;

/// Main error type for svpipe operations
#[derive(Error, Debug)]
pub enum SvError {
    /// I/O errors (thread spawn, work directory creation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (invalid thread quota, unusable paths)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An external stage collaborator failed
    #[error("{stage} stage failed: {source}")]
    ToolFailure {
        stage: StageId,
        #[source]
        source: ToolError,
    },

    /// Unreachable stage transition. Indicates a bug, never a bad input.
    #[error("Internal state error in {stage} stage: {message}")]
    InternalState { stage: StageId, message: String },
}

/// Type alias for Results using SvError
pub type Result<T> = std::result::Result<T, SvError>;

impl SvError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wrap a collaborator failure with the stage it happened in
    pub fn tool(stage: StageId, source: ToolError) -> Self {
        Self::ToolFailure { stage, source }
    }

    /// Create an internal state error
    pub fn internal(stage: StageId, message: impl Into<String>) -> Self {
        Self::InternalState {
            stage,
            message: message.into(),
        }
    }

    /// Stage the error is attributed to, if any
    pub fn stage(&self) -> Option<StageId> {
        match self {
            Self::ToolFailure { stage, .. } | Self::InternalState { stage, .. } => Some(*stage),
            Self::Io(_) | Self::Config { .. } => None,
        }
    }
}

/// Failure reported by a stage collaborator
#[derive(Error, Debug)]
pub enum ToolError {
    /// The executable could not be started
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The executable ran but exited unsuccessfully
    #[error("{program} exited with {status}{}", format_stderr(.stderr))]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    /// An expected output was not produced
    #[error("missing output: {path}")]
    MissingOutput { path: PathBuf },

    /// Any other collaborator-specific failure
    #[error("{message}")]
    Failed { message: String },

    /// The background thread running the collaborator panicked
    #[error("{task} thread panicked")]
    Panicked { task: String },
}

impl ToolError {
    /// Create a generic collaborator failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}
