//! Column descriptors describing a row's shape.
//!
//! A `Schema` is negotiated once per channel, lazily, on the first row a step
//! writes. Steps that add or remove columns build a new schema from their
//! input schema; schemas are shared through `Arc` and never mutated after
//! negotiation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Date,
    Boolean,
    Binary,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Date => "date",
            ValueType::Boolean => "boolean",
            ValueType::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// Whitespace trim directive applied by steps that parse text input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimKind {
    #[default]
    None,
    Left,
    Right,
    Both,
}

/// One column descriptor. Names are unique within a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Optional conversion format (dates, numerics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(default, skip_serializing_if = "is_default_trim")]
    pub trim: TrimKind,
}

fn is_default_trim(t: &TrimKind) -> bool {
    *t == TrimKind::None
}

impl Column {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            format: None,
            precision: None,
            trim: TrimKind::None,
        }
    }
}

/// Ordered sequence of column descriptors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Index of the named column. Steps cache this once on the first row;
    /// per-row lookups by name are a bug.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// New schema with `column` appended.
    pub fn with_column(&self, column: Column) -> Schema {
        let mut columns = self.columns.clone();
        columns.push(column);
        Schema { columns }
    }

    /// New schema extended with all of `extra`.
    pub fn with_columns(&self, extra: impl IntoIterator<Item = Column>) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(extra);
        Schema { columns }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
