//! Built-in step types.
//!
//! Each step implements the [`StepPlugin`](crate::pipeline::step::StepPlugin)
//! contract and is registered under its type tag. They are deliberately
//! small: the engine ships the plumbing, plugins ship the business logic.

pub mod dummy;
pub mod filter;
pub mod generator;
pub mod injector;
pub mod rows_to_result;
pub mod sub_pipeline;

pub use dummy::DummyStep;
pub use filter::FilterStep;
pub use generator::GeneratorStep;
pub use injector::InjectorStep;
pub use rows_to_result::RowsToResultStep;
pub use sub_pipeline::SubPipelineExecutorStep;

use crate::pipeline::registry::StepRegistry;

/// Register every built-in step type.
pub fn register_builtins(registry: &mut StepRegistry) {
    registry.register("injector", || Box::new(InjectorStep::new()));
    registry.register("generator", || Box::new(GeneratorStep::new()));
    registry.register("filter", || Box::new(FilterStep::new()));
    registry.register("dummy", || Box::new(DummyStep::new()));
    registry.register("rows-to-result", || Box::new(RowsToResultStep::new()));
    registry.register("sub-pipeline", || Box::new(SubPipelineExecutorStep::new()));
}
