// src/error.rs
use thiserror::Error;

use crate::model::ContactId;

/// Domain failures of the sync pipeline.
///
/// Stage functions return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<SyncError>()`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transcripts not returned for all contact ids ({returned} of {requested}), missing {missing:?}")]
    IncompleteFetch {
        requested: usize,
        returned: usize,
        missing: Vec<ContactId>,
    },

    #[error("artifact file name does not match its naming convention: {file_name}")]
    MalformedArtifactName { file_name: String },

    #[error("load batch for `{table}` is not homogeneous: row {row} has columns {found:?}, expected {expected:?}")]
    HeterogeneousBatch {
        table: String,
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("recording transform of {file_name} produced no `messages` array")]
    MissingMessages { file_name: String },

    #[error("`{name}` is not a valid table or column identifier")]
    InvalidIdentifier { name: String },

    #[error("usage: {0}")]
    UsageError(String),

    #[error("enhancement failed for {} contact ids: {failed:?}", failed.len())]
    EnhancementFailed { failed: Vec<ContactId> },
}

/// Errors raised while compiling or running a transform pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("unknown transform step `{name}`{}", suggestion.as_ref().map(|s| format!(" (did you mean `{s}`?)")).unwrap_or_default())]
    UnknownStep {
        name: String,
        suggestion: Option<String>,
    },

    #[error("invalid arguments for step `{step}`: {reason}")]
    InvalidArgs { step: String, reason: String },

    #[error("step `{step}` cannot run in a {mode} pipeline")]
    StepNotApplicable { step: String, mode: &'static str },

    #[error("step `{step}` expected {expected}")]
    ShapeMismatch {
        step: String,
        expected: &'static str,
    },

    #[error("no transform pipeline configured for `{0}`")]
    MissingPipeline(String),
}

impl TransformError {
    pub(crate) fn args(step: &str, reason: impl Into<String>) -> Self {
        TransformError::InvalidArgs {
            step: step.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(step: &str, expected: &'static str) -> Self {
        TransformError::ShapeMismatch {
            step: step.to_string(),
            expected,
        }
    }
}
