//! Structured field records attached to payloads and events
//!
//! Analyzers declare a [`DataSchema`] and fill a [`DataRecord`] while they
//! classify a payload. Fields are either scalar or keyed lists; the filter
//! adapter addresses list entries as `field[key]`.

use std::{fmt, sync::Arc};

/// A typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    UInt(u64),
    Int(i64),
    Bool(bool),
}

impl Value {
    /// Borrow the string payload if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Compare against a textual literal, as written in a filter expression
    pub fn matches_literal(&self, literal: &str) -> bool {
        match self {
            Value::String(s) => s == literal,
            Value::UInt(v) => literal.parse::<u64>().map(|l| l == *v).unwrap_or(false),
            Value::Int(v) => literal.parse::<i64>().map(|l| l == *v).unwrap_or(false),
            Value::Bool(v) => literal.parse::<bool>().map(|l| l == *v).unwrap_or(false),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Declaration of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    /// Keyed list rather than a single value
    pub list: bool,
}

/// Ordered set of field declarations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSchema {
    fields: Vec<FieldDef>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar field
    pub fn scalar(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            list: false,
        });
        self
    }

    /// Add a keyed list field
    pub fn list(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            list: true,
        });
        self
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Position of a field by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DataItem {
    Scalar(Option<Value>),
    List(Vec<(String, Value)>),
}

/// Field values laid out according to a schema
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    schema: Arc<DataSchema>,
    items: Vec<DataItem>,
}

impl DataRecord {
    /// Allocate an empty record for a schema
    pub fn new(schema: Arc<DataSchema>) -> Self {
        let items = schema
            .fields()
            .iter()
            .map(|f| {
                if f.list {
                    DataItem::List(Vec::new())
                } else {
                    DataItem::Scalar(None)
                }
            })
            .collect();
        Self { schema, items }
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    /// Set a scalar field. Returns false if the field is unknown or a list.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> bool {
        match self.schema.index_of(field).map(|i| &mut self.items[i]) {
            Some(DataItem::Scalar(slot)) => {
                *slot = Some(value.into());
                true
            }
            _ => false,
        }
    }

    /// Append an entry to a list field. Returns false if the field is unknown or scalar.
    pub fn push(&mut self, field: &str, key: impl Into<String>, value: impl Into<Value>) -> bool {
        match self.schema.index_of(field).map(|i| &mut self.items[i]) {
            Some(DataItem::List(entries)) => {
                entries.push((key.into(), value.into()));
                true
            }
            _ => false,
        }
    }

    /// Look up a field, optionally by list key.
    ///
    /// A list field without a key, or a scalar field with one, yields `None`.
    pub fn get(&self, field: &str, key: Option<&str>) -> Option<&Value> {
        let item = &self.items[self.schema.index_of(field)?];
        match (item, key) {
            (DataItem::Scalar(value), None) => value.as_ref(),
            (DataItem::List(entries), Some(key)) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}
