//! Error handling for the rowflow engine
//!
//! This module defines the top-level error type and a Result alias used at
//! the crate boundary. Step-level runtime errors live in
//! [`crate::pipeline::error`].

use thiserror::Error;

/// Main error type for rowflow operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// The pipeline definition is structurally invalid (dangling hop,
    /// duplicate step name, unknown step type, cycle).
    #[error("Definition error: {0}")]
    Definition(String),

    /// A step failed to initialize; the pipeline never started.
    #[error("Step '{step}' failed to initialize: {message}")]
    StepInit { step: String, message: String },

    /// The pipeline was used out of lifecycle order.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Errors loading a definition document.
    #[error("Definition parse error: {0}")]
    Parse(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for rowflow operations
pub type Result<T> = std::result::Result<T, EngineError>;
