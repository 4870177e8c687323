//! Error kinds for the claimgate core.
//!
//! Stage-local errors never escape a pipeline run: the stage runner turns
//! them into structured failure outcomes. Configuration loading uses
//! `anyhow` instead (see [`crate::config`]).

use thiserror::Error;

/// Errors raised by the canonical engine, the record model, the budget and
/// the pipeline stages
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// No text or claims to process
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Attempted mutation of a published canonical policy
    #[error("Immutable config: {0}")]
    ImmutableConfig(String),

    /// Missing evidence, missing spans or invalid offsets
    #[error("Structural invalidity: {0}")]
    StructuralInvalidity(String),

    /// Recorded span text diverges from the canonical source
    #[error("Content mismatch at [{start}:{end}]: expected {expected:?}, found {found:?}")]
    ContentMismatch {
        start: usize,
        end: usize,
        expected: String,
        found: String,
    },

    /// No further metered work is permitted for this run
    #[error("budget_exhausted")]
    BudgetExhausted,

    /// External metered-work call failed
    #[error("Provider error ({model}): {message}")]
    Provider { model: String, message: String },

    /// Raw range outside of `0 <= start < end <= len`
    #[error("Invalid raw range [{start}:{end}) for text of {len} chars")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// Usage that would decrease a budget total
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Cooperative stop was requested for the run
    #[error("Run stopped: {0}")]
    Stopped(String),
}

impl CoreError {
    /// Short machine-readable kind, used in audit events and failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::EmptyInput(_) => "empty_input",
            CoreError::ImmutableConfig(_) => "immutable_config",
            CoreError::StructuralInvalidity(_) => "structural_invalidity",
            CoreError::ContentMismatch { .. } => "content_mismatch",
            CoreError::BudgetExhausted => "budget_exhausted",
            CoreError::Provider { .. } => "provider_error",
            CoreError::InvalidRange { .. } => "invalid_range",
            CoreError::InvalidUsage(_) => "invalid_usage",
            CoreError::Stopped(_) => "stopped",
        }
    }
}

/// Result alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
