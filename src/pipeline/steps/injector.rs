//! Injector step — the externally fed source.
//!
//! Has no upstream hops of its own; it blocks on the injection channel a
//! [`RowProducer`](crate::pipeline::executor::RowProducer) creates and
//! forwards whatever arrives. The sub-pipeline executor uses an injector as
//! the nested pipeline's entry point for seed rows; tests use it to drive a
//! pipeline by hand.

use crate::pipeline::error::StepResult;
use crate::pipeline::graph::StepDef;
use crate::pipeline::step::{StepContext, StepPlugin};
use crate::pipeline::variables::VariableScope;
use std::sync::Arc;

#[derive(Default)]
pub struct InjectorStep;

impl InjectorStep {
    pub fn new() -> Self {
        Self
    }
}

impl StepPlugin for InjectorStep {
    fn init(&mut self, _def: &StepDef, _scope: &Arc<VariableScope>) -> StepResult<()> {
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool> {
        match ctx.get_row() {
            Some((schema, row)) => {
                ctx.put_row(schema, row);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
