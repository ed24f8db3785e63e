//! Aggregated outcome of one pipeline run.
//!
//! A `PipelineResult` is created fresh per run, finalized once every step
//! thread has terminated, and handed to the caller — or carried into the
//! next nested invocation as its input seed. The row-count fields mirror
//! the per-step counters they are summed from.

use crate::row::{Row, Schema};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Process exit codes exposed to the embedding CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// The run completed but rows were rejected or steps reported errors.
    FinishedWithErrors = 1,
    /// An unexpected failure outside the prepare/init contract.
    UnexpectedError = 2,
    /// The pipeline could not be prepared or initialized.
    UnableToPrepare = 3,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A file a step registered as part of the run's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFile {
    pub path: PathBuf,
    /// Name of the step that produced or retrieved the file.
    pub origin: String,
}

/// Summed row counters across all steps of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub read: u64,
    pub written: u64,
    pub input: u64,
    pub output: u64,
    pub updated: u64,
    pub deleted: u64,
    pub rejected: u64,
    pub files_retrieved: u64,
}

/// The aggregated outcome object.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub counts: RowCounts,
    pub errors: u64,
    /// True when the run was cancelled. Distinct from failure: a stopped run
    /// with zero errors is not "failed", it is incomplete.
    pub stopped: bool,
    pub duration: Duration,
    pub files: Vec<ResultFile>,
    /// Rows carried between pipeline invocations (parent seed rows in, rows
    /// a step explicitly promoted to the result out).
    pub rows: Vec<Row>,
    pub rows_schema: Option<Arc<Schema>>,
    /// Accumulated log text of the run, taken from the log registry.
    pub log_text: String,
    pub log_channel_id: String,
}

impl PipelineResult {
    /// A run succeeds when no step reported an error.
    pub fn success(&self) -> bool {
        self.errors == 0
    }

    /// Maps the outcome to the process contract. Rejected rows count as
    /// "completed with row errors" even though they do not fail the run.
    pub fn exit_code(&self) -> ExitCode {
        if self.errors > 0 || self.counts.rejected > 0 {
            ExitCode::FinishedWithErrors
        } else {
            ExitCode::Success
        }
    }

    pub fn add_file(&mut self, file: ResultFile) {
        self.files.push(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_reflects_errors() {
        let mut result = PipelineResult::default();
        assert!(result.success());
        assert_eq!(result.exit_code(), ExitCode::Success);

        result.errors = 2;
        assert!(!result.success());
        assert_eq!(result.exit_code(), ExitCode::FinishedWithErrors);
    }

    #[test]
    fn test_stopped_is_not_failure() {
        let result = PipelineResult {
            stopped: true,
            ..Default::default()
        };
        assert!(result.success());
        assert!(result.stopped);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::FinishedWithErrors.code(), 1);
        assert_eq!(ExitCode::UnexpectedError.code(), 2);
        assert_eq!(ExitCode::UnableToPrepare.code(), 3);
    }
}
