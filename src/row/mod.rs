//! Row and value model — the typed tuples flowing through the engine.
//!
//! A `Row` is an ordered, fixed-arity sequence of dynamically typed `Value`s.
//! Rows are immutable once handed to a channel: the storage is `Arc`-backed,
//! cloning is cheap, and any step that wants to mutate builds a new row via
//! [`Row::builder`] or [`Row::with_appended`].
//!
//! Each row is self-describing through the [`Schema`] paired with it on the
//! channel; see [`schema`].

pub mod schema;

pub use schema::{Column, Schema, TrimKind, ValueType};

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// A single dynamically typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Number(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
    Binary(Vec<u8>),
    /// Absent / null value.
    None,
}

impl Value {
    /// The declared type this value naturally maps to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::Date(_) => ValueType::Date,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Binary(_) => ValueType::Binary,
            Value::None => ValueType::String,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Render the value for log output and textual comparison.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(v) => v.to_string(),
            Value::Number(v) => v.to_string(),
            Value::Date(d) => d.to_rfc3339(),
            Value::Boolean(v) => v.to_string(),
            Value::Binary(b) => format!("<{} bytes>", b.len()),
            Value::None => String::new(),
        }
    }

    /// Equality used by field-change grouping. `case_insensitive` applies to
    /// string values only; all other kinds compare exactly.
    pub fn group_eq(&self, other: &Value, case_insensitive: bool) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) if case_insensitive => {
                a.eq_ignore_ascii_case(b)
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

/// An immutable tuple of values. Cloning shares the underlying storage.
#[derive(Clone, PartialEq)]
pub struct Row {
    values: Arc<[Value]>,
}

impl Row {
    /// Build a row from owned values.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            values: values.into(),
        }
    }

    /// Empty row (arity zero).
    pub fn empty() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn builder() -> RowBuilder {
        RowBuilder { values: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// New row with `value` appended. The receiver is untouched.
    pub fn with_appended(&self, value: Value) -> Row {
        let mut values: Vec<Value> = self.values.to_vec();
        values.push(value);
        Row::from_values(values)
    }

    /// New row extended with all of `extra`.
    pub fn with_extended(&self, extra: impl IntoIterator<Item = Value>) -> Row {
        let mut values: Vec<Value> = self.values.to_vec();
        values.extend(extra);
        Row::from_values(values)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row").field("arity", &self.len()).finish()
    }
}

/// Incremental row construction.
pub struct RowBuilder {
    values: Vec<Value>,
}

impl RowBuilder {
    pub fn push(mut self, value: Value) -> Self {
        self.values.push(value);
        self
    }

    pub fn string(self, s: impl Into<String>) -> Self {
        self.push(Value::String(s.into()))
    }

    pub fn integer(self, v: i64) -> Self {
        self.push(Value::Integer(v))
    }

    pub fn number(self, v: f64) -> Self {
        self.push(Value::Number(v))
    }

    pub fn boolean(self, v: bool) -> Self {
        self.push(Value::Boolean(v))
    }

    pub fn build(self) -> Row {
        Row::from_values(self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_clone_shares_storage() {
        let row = Row::builder().integer(1).string("a").build();
        let copy = row.clone();
        assert_eq!(row, copy);
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.get(1).unwrap().as_str(), Some("a"));
    }

    #[test]
    fn test_with_appended_leaves_original() {
        let row = Row::builder().integer(1).build();
        let extended = row.with_appended(Value::String("x".into()));
        assert_eq!(row.len(), 1);
        assert_eq!(extended.len(), 2);
    }

    #[test]
    fn test_group_eq_case_modes() {
        let a = Value::String("Alpha".into());
        let b = Value::String("alpha".into());
        assert!(!a.group_eq(&b, false));
        assert!(a.group_eq(&b, true));
        assert!(Value::Integer(3).group_eq(&Value::Integer(3), true));
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Integer(42).to_display_string(), "42");
        assert_eq!(Value::None.to_display_string(), "");
        assert_eq!(Value::Binary(vec![0, 1]).to_display_string(), "<2 bytes>");
    }
}
