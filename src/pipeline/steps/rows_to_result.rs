//! Rows-to-result step — promotes every input row into the pipeline
//! result's carried row list, and forwards it downstream unchanged.
//!
//! The carried rows travel with the [`PipelineResult`] to the caller or the
//! next pipeline invocation.

use crate::pipeline::error::StepResult;
use crate::pipeline::graph::StepDef;
use crate::pipeline::step::{StepContext, StepPlugin};
use crate::pipeline::variables::VariableScope;
use std::sync::Arc;

#[derive(Default)]
pub struct RowsToResultStep;

impl RowsToResultStep {
    pub fn new() -> Self {
        Self
    }
}

impl StepPlugin for RowsToResultStep {
    fn init(&mut self, _def: &StepDef, _scope: &Arc<VariableScope>) -> StepResult<()> {
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool> {
        match ctx.get_row() {
            Some((schema, row)) => {
                ctx.add_result_rows(Arc::clone(&schema), [row.clone()]);
                ctx.put_row(schema, row);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
