//! Record-oriented dataflow pipeline engine.
//!
//! A pipeline is a directed graph of steps connected by hops; every hop is
//! realized as a bounded [`RowChannel`] between one producer copy and one
//! consumer copy, and every (step, copy) pair runs on its own OS thread.
//!
//! # Architecture
//!
//! ```text
//! [generator] ──► [filter] ──► [sub-pipeline] ──► [dummy]
//!                                   │ per group
//!                                   ▼
//!                            nested Pipeline (own threads, own scope)
//! ```
//!
//! # Design
//!
//! - **Thread per (step, copy)** — true parallelism; channels carry the
//!   backpressure.
//! - **Cooperative cancellation** — a shared [`StopSignal`] polled between
//!   row iterations and inside every channel wait; no thread is killed.
//! - **Explicit contexts** — the log registry and variable scope are
//!   objects handed to each pipeline instance, never process globals.
//! - **Tagged-variant dispatch** — step types resolve through a
//!   [`StepRegistry`] of factory functions.

pub mod channel;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod registry;
pub mod result;
pub mod step;
pub mod steps;
pub mod variables;

pub use channel::{PutResult, RowChannel, StopSignal, DEFAULT_CHANNEL_CAPACITY};
pub use error::{StepError, StepResult};
pub use executor::{Pipeline, RowProducer, StepHandle};
pub use graph::{HopDef, HopKind, ParameterDef, PipelineDef, RowDistribution, StepDef};
pub use logging::{LogChannelId, LogRegistry};
pub use registry::StepRegistry;
pub use result::{ExitCode, PipelineResult, ResultFile, RowCounts};
pub use step::{RowListener, StepContext, StepMetrics, StepPlugin, StepState};
pub use variables::VariableScope;
