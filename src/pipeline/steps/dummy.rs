//! Dummy step — forwards every input row unchanged.
//!
//! Useful as a junction, a sink to observe with a row listener, or an
//! addressed target for the sub-pipeline executor's emissions.

use crate::pipeline::error::StepResult;
use crate::pipeline::graph::StepDef;
use crate::pipeline::step::{StepContext, StepPlugin};
use crate::pipeline::variables::VariableScope;
use std::sync::Arc;

#[derive(Default)]
pub struct DummyStep;

impl DummyStep {
    pub fn new() -> Self {
        Self
    }
}

impl StepPlugin for DummyStep {
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
