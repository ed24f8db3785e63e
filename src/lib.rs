//! # rowflow: Record-Oriented ETL Dataflow Engine
//!
//! A pipeline engine that turns a declared step/hop graph into running
//! threads exchanging typed rows through bounded queues, plus a recursive
//! sub-pipeline executor that batches rows into groups and runs a nested
//! pipeline per group.
//!
//! ## Architecture
//!
//! - **Row model**: dynamically typed tuples paired with a negotiated
//!   [`Schema`](row::Schema)
//! - **Channels**: bounded crossbeam queues with backpressure and
//!   flush/discard close semantics
//! - **Steps**: plugin contract (`init` / `process_row` / `dispose`) run on
//!   one thread per copy
//! - **Pipelines**: prepare, start, wait, stop — aggregated into a
//!   [`PipelineResult`](pipeline::PipelineResult)
//!
//! ## Example
//!
//! ```ignore
//! use rowflow::pipeline::{Pipeline, PipelineDef, StepRegistry};
//! use std::sync::Arc;
//!
//! let def: PipelineDef = serde_json::from_str(include_str!("demo.json"))?;
//! let registry = Arc::new(StepRegistry::with_builtins());
//! let mut pipeline = Pipeline::new(Arc::new(def), registry);
//! let result = pipeline.execute()?;
//! std::process::exit(result.exit_code().code());
//! ```

pub mod error;
pub mod pipeline;
pub mod row;

pub use error::{EngineError, Result};
pub use pipeline::{
    ExitCode, Pipeline, PipelineDef, PipelineResult, RowProducer, StepPlugin, StepRegistry,
    VariableScope,
};
pub use row::{Column, Row, Schema, Value, ValueType};
