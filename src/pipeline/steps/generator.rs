//! Generator step — emits a configured number of identical rows.
//!
//! Settings:
//!
//! ```json
//! {
//!   "limit": 100,
//!   "columns": [
//!     {"name": "id", "type": "integer", "value": 1},
//!     {"name": "greeting", "type": "string", "value": "hello ${WHO}"}
//!   ]
//! }
//! ```
//!
//! String values are substituted against the pipeline scope at init time.

use crate::pipeline::error::{StepError, StepResult};
use crate::pipeline::graph::StepDef;
use crate::pipeline::step::{StepContext, StepPlugin};
use crate::pipeline::variables::VariableScope;
use crate::row::{Column, Row, Schema, Value, ValueType};
use chrono::DateTime;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct GeneratorSettings {
    limit: u64,
    columns: Vec<GeneratorColumn>,
}

#[derive(Debug, Deserialize)]
struct GeneratorColumn {
    name: String,
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Default)]
pub struct GeneratorStep {
    limit: u64,
    emitted: u64,
    schema: Option<Arc<Schema>>,
    template: Option<Row>,
}

impl GeneratorStep {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Convert a configured JSON literal to the declared value kind.
fn literal_value(
    column: &GeneratorColumn,
    scope: &Arc<VariableScope>,
) -> StepResult<Value> {
    let wrong_type = || {
        StepError::config(format!(
            "column '{}' declares type {} but its value does not match",
            column.name, column.value_type
        ))
    };
    if column.value.is_null() {
        return Ok(Value::None);
    }
    match column.value_type {
        ValueType::String => {
            let s = column.value.as_str().ok_or_else(wrong_type)?;
            Ok(Value::String(scope.substitute(s)))
        }
        ValueType::Integer => column
            .value
            .as_i64()
            .map(Value::Integer)
            .ok_or_else(wrong_type),
        ValueType::Number => column
            .value
            .as_f64()
            .map(Value::Number)
            .ok_or_else(wrong_type),
        ValueType::Boolean => column
            .value
            .as_bool()
            .map(Value::Boolean)
            .ok_or_else(wrong_type),
        ValueType::Date => {
            let s = column.value.as_str().ok_or_else(wrong_type)?;
            let parsed = DateTime::parse_from_rfc3339(s).map_err(|e| {
                StepError::config(format!(
                    "column '{}' has unparseable date '{s}': {e}",
                    column.name
                ))
            })?;
            Ok(Value::Date(parsed.with_timezone(&chrono::Utc)))
        }
        ValueType::Binary => {
            let s = column.value.as_str().ok_or_else(wrong_type)?;
            Ok(Value::Binary(s.as_bytes().to_vec()))
        }
    }
}

impl StepPlugin for GeneratorStep {
    fn init(&mut self, def: &StepDef, scope: &Arc<VariableScope>) -> StepResult<()> {
        let settings: GeneratorSettings = serde_json::from_value(def.settings.clone())
            .map_err(|e| StepError::config(format!("invalid generator settings: {e}")))?;
        if settings.columns.is_empty() {
            return Err(StepError::config("generator declares no columns"));
        }

        let mut columns = Vec::with_capacity(settings.columns.len());
        let mut values = Vec::with_capacity(settings.columns.len());
        for col in &settings.columns {
            let mut descriptor = Column::new(&col.name, col.value_type);
            descriptor.format = col.format.clone();
            columns.push(descriptor);
            values.push(literal_value(col, scope)?);
        }

        self.limit = settings.limit;
        self.schema = Some(Arc::new(Schema::new(columns)));
        self.template = Some(Row::from_values(values));
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> StepResult<bool> {
        if self.emitted >= self.limit {
            return Ok(false);
        }
        let schema = self.schema.as_ref().expect("initialized").clone();
        let row = self.template.as_ref().expect("initialized").clone();
        ctx.put_row(schema, row);
        self.emitted += 1;
        Ok(true)
    }
}
