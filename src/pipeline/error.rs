//! Step-level runtime error types.

use crate::row::{Row, Schema};
use std::sync::Arc;
use thiserror::Error;

/// Errors a step plugin can raise while running.
#[derive(Error, Debug)]
pub enum StepError {
    /// A single row could not be processed. If the step has an error hop
    /// configured, the row is diverted there with the code and message
    /// appended as diagnostic columns and processing continues; otherwise
    /// the fault escalates to [`StepError::Fatal`].
    #[error("Row error [{code}]: {message}")]
    Row {
        schema: Arc<Schema>,
        row: Row,
        code: String,
        message: String,
    },

    /// Unrecoverable step failure. Triggers pipeline-wide cooperative
    /// cancellation.
    #[error("Step error: {0}")]
    Fatal(String),

    /// Invalid or missing configuration, detected during `init`.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StepError {
    pub fn fatal(message: impl Into<String>) -> Self {
        StepError::Fatal(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        StepError::Config(message.into())
    }

    pub fn row(
        schema: Arc<Schema>,
        row: Row,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StepError::Row {
            schema,
            row,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result alias for step plugin hooks.
pub type StepResult<T> = std::result::Result<T, StepError>;
