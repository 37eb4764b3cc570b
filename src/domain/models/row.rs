//! Row model shared by the cache and the replay feeder.
//!
//! A [`Row`] pairs a shape descriptor ([`RowSchema`]) with its data values.
//! A [`RowSequence`] is the immutable, re-iterable result of one expensive
//! computation, replayed any number of times without recomputation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Timestamp,
}

/// One named, typed column of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: ValueKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered field list describing the shape of a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowSchema {
    fields: Vec<Field>,
}

impl RowSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the field called `name`, if any.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single data value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

/// A row: shape descriptor plus data values.
///
/// Cloning deep-copies the values and shares the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<RowSchema>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(schema: Arc<RowSchema>, values: Vec<Value>) -> Self {
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    /// Value of the field called `name`, if the schema has one.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|i| self.values.get(i))
    }
}

/// Immutable, ordered, re-iterable sequence of cached rows.
///
/// Clones share the same backing storage.
#[derive(Debug, Clone, Default)]
pub struct RowSequence {
    rows: Arc<[Row]>,
}

impl RowSequence {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn as_slice(&self) -> &[Row] {
        &self.rows
    }

    /// True if both sequences share the same backing storage.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.rows, &other.rows)
    }
}

impl From<Vec<Row>> for RowSequence {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

impl FromIterator<Row> for RowSequence {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RowSequence {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<RowSchema> {
        Arc::new(RowSchema::new(vec![
            Field::new("id", ValueKind::Int),
            Field::new("name", ValueKind::Text),
        ]))
    }

    #[test]
    fn test_row_lookup_by_name() {
        let row = Row::new(schema(), vec![Value::Int(7), Value::from("seven")]);
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("name"), Some(&Value::Text("seven".to_string())));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_row_clone_is_independent() {
        let original = Row::new(schema(), vec![Value::Int(1), Value::from("a")]);
        let mut copy = original.clone();
        copy.values_mut()[1] = Value::from("changed");

        assert_eq!(original.get("name"), Some(&Value::Text("a".to_string())));
        assert!(Arc::ptr_eq(original.schema(), copy.schema()));
    }

    #[test]
    fn test_sequence_is_reiterable() {
        let schema = schema();
        let seq: RowSequence = (0..3)
            .map(|i| Row::new(schema.clone(), vec![Value::Int(i), Value::Null]))
            .collect();

        let first: Vec<_> = seq.iter().map(|r| r.values()[0].clone()).collect();
        let second: Vec<_> = (&seq).into_iter().map(|r| r.values()[0].clone()).collect();
        assert_eq!(first, second);
        assert_eq!(seq.len(), 3);
        assert!(seq.shares_storage_with(&seq.clone()));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bytes(vec![1, 2]).to_string(), "<2 bytes>");
        assert_eq!(Value::from(3_i64).to_string(), "3");
    }
}
