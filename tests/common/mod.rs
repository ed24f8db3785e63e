//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod steps;

use rowflow::pipeline::{PipelineDef, RowListener, StepRegistry};
use rowflow::row::{Column, Row, Schema, Value, ValueType};
use std::sync::{Arc, Mutex};

/// Registry with built-ins plus the test-only step types.
pub fn test_registry() -> Arc<StepRegistry> {
    let mut registry = StepRegistry::with_builtins();
    registry.register("sleeper", || Box::new(steps::SleeperStep::new()));
    registry.register("file-writer", || Box::new(steps::FileWriterStep::new()));
    Arc::new(registry)
}

/// Parse a JSON pipeline definition.
pub fn def(json: serde_json::Value) -> Arc<PipelineDef> {
    Arc::new(serde_json::from_value(json).expect("valid pipeline definition"))
}

/// Schema from (name, type) pairs.
pub fn schema_of(columns: &[(&str, ValueType)]) -> Arc<Schema> {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|(name, t)| Column::new(*name, *t))
            .collect(),
    ))
}

/// Thread-safe row sink usable as a row listener.
#[derive(Clone, Default)]
pub struct Collector {
    rows: Arc<Mutex<Vec<(Arc<Schema>, Row)>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> RowListener {
        let rows = Arc::clone(&self.rows);
        Box::new(move |schema: &Arc<Schema>, row: &Row| {
            rows.lock().unwrap().push((Arc::clone(schema), row.clone()));
        })
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows(&self) -> Vec<(Arc<Schema>, Row)> {
        self.rows.lock().unwrap().clone()
    }

    /// Integer values of column `index` across all collected rows.
    pub fn integers(&self, index: usize) -> Vec<i64> {
        self.rows()
            .iter()
            .map(|(_, r)| r.get(index).and_then(Value::as_integer).unwrap())
            .collect()
    }

    /// String values of column `index` across all collected rows.
    pub fn strings(&self, index: usize) -> Vec<String> {
        self.rows()
            .iter()
            .map(|(_, r)| r.get(index).unwrap().to_display_string())
            .collect()
    }

    /// Boolean values of column `index` across all collected rows.
    pub fn booleans(&self, index: usize) -> Vec<bool> {
        self.rows()
            .iter()
            .map(|(_, r)| r.get(index).and_then(Value::as_boolean).unwrap())
            .collect()
    }

    /// Values of the named column, resolved per row against its schema.
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.rows()
            .iter()
            .map(|(s, r)| {
                let idx = s.index_of(name).expect("column present");
                r.get(idx).unwrap().clone()
            })
            .collect()
    }
}
