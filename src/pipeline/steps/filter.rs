//! Filter step — passes rows whose field matches a configured predicate.
//!
//! Settings:
//!
//! ```json
//! {"field": "status", "op": "eq", "value": "active", "on_mismatch": "drop"}
//! ```
//!
//! `on_mismatch` selects what happens to non-matching rows: `"drop"`
//! discards them, `"error"` raises a row-level fault — diverted to the error
//! hop when one is configured, escalating otherwise.

use crate::pipeline::error::{StepError, StepResult};
use crate::pipeline::graph::StepDef;
use crate::pipeline::step::{StepContext, StepPlugin};
use crate::pipeline::variables::VariableScope;
use crate::row::{Schema, Value};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MismatchAction {
    #[default]
    Drop,
    Error,
}

#[derive(Debug, Deserialize)]
struct FilterSettings {
    field: String,
    op: FilterOp,
    value: serde_json::Value,
    #[serde(default)]
    on_mismatch: MismatchAction,
}

pub struct FilterStep {
    settings: Option<FilterSettings>,
    compare_to: Value,
    /// Field index, cached on the first row.
    field_index: Option<usize>,
}

impl Default for FilterStep {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterStep {
    pub fn new() -> Self {
        Self {
            settings: None,
            compare_to: Value::None,
            field_index: None,
        }
    }

    fn resolve_field(&mut self, schema: &Schema) -> StepResult<usize> {
        if let Some(idx) = self.field_index {
            return Ok(idx);
        }
        let settings = self.settings.as_ref().expect("initialized");
        let idx = schema.index_of(&settings.field).ok_or_else(|| {
            StepError::fatal(format!(
                "filter field '{}' not present in input schema",
                settings.field
            ))
        })?;
        self.field_index = Some(idx);
        Ok(idx)
    }

    fn matches(&self, value: &Value) -> bool {
        let op = self.settings.as_ref().expect("initialized").op;
        match op {
            FilterOp::Eq => value == &self.compare_to,
            FilterOp::Ne => value != &self.compare_to,
            FilterOp::Contains => match (value, &self.compare_to) {
                (Value::String(hay), Value::String(needle)) => hay.contains(needle.as_str()),
                _ => false,
            },
            FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le => {
                let (Some(a), Some(b)) = (value.as_number(), self.compare_to.as_number()) else {
                    return false;
                };
                match op {
                    FilterOp::Gt => a > b,
                    FilterOp::Ge => a >= b,
                    FilterOp::Lt => a < b,
                    FilterOp::Le => a <= b,
                    _ => unreachable!(),
                }
            }
        }
    }
}

/// Natural conversion of a JSON literal, with `${}` substitution on strings.
fn json_to_value(json: &serde_json::Value, scope: &Arc<VariableScope>) -> StepResult<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::None),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or_default()))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(scope.substitute(s))),
        other => Err(StepError::config(format!(
            "unsupported filter comparison literal: {other}"
        ))),
    }
}

impl StepPlugin for FilterStep {
    fn init(&mut self, def: &StepDef, scope: &Arc<VariableScope>) -> StepResult<()> {
        let settings: FilterSettings = serde_json::from_value(def.settings.clone())
            .map_err(|e| StepError::config(format!("invalid filter settings: {e}")))?;
        if settings.field.is_empty() {
            return Err(StepError::config("filter field name is empty"));
        }
        self.compare_to = json_to_value(&settings.value, scope)?;
        self.settings = Some(settings);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool> {
        let Some((schema, row)) = ctx.get_row() else {
            return Ok(false);
        };
        let idx = self.resolve_field(&schema)?;
        let value = row.get(idx).cloned().unwrap_or(Value::None);
        if self.matches(&value) {
            ctx.put_row(schema, row);
        } else if self.settings.as_ref().expect("initialized").on_mismatch
            == MismatchAction::Error
        {
            return Err(StepError::row(
                schema,
                row,
                "FILTER_MISMATCH",
                format!("value '{value}' rejected by filter"),
            ));
        }
        Ok(true)
    }
}
