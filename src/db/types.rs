//! Result types shared by the adapters, the executor and the client.
//!
//! Defines the canonical column metadata, row values and per-statement results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical column type.
///
/// This is a deliberately lossy vocabulary: integers, decimals and floats all
/// collapse to `Float`, and anything unrecognized is `String`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    #[default]
    String,
    Bytes,
    Float,
    Datetime,
}

impl ColumnType {
    /// Returns the serialized name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Float => "float",
            Self::Datetime => "datetime",
        }
    }

    /// Parses a type name, falling back to `String` for anything unknown.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bytes" | "binary" => Self::Bytes,
            "float" | "number" => Self::Float,
            "datetime" => Self::Datetime,
            _ => Self::String,
        }
    }
}

impl From<String> for ColumnType {
    fn from(s: String) -> Self {
        Self::parse_lenient(&s)
    }
}

impl From<ColumnType> for String {
    fn from(t: ColumnType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,

    /// Canonical column type.
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
}

impl ColumnMetadata {
    /// Creates a new column with the given name and type.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A row of data from a statement result.
pub type Row = Vec<Value>;

/// Represents a single value from a database query.
///
/// Serialized untagged so rows travel as plain JSON arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value. Dates and timestamps are carried as ISO-8601 text.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Nested structures (lists, maps, structs) from engines that have them.
    Json(serde_json::Value),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to convert the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Json(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Results for a single executed statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementResults {
    /// The statement text as executed.
    #[serde(default)]
    pub sql: String,

    /// Column metadata for the result set.
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,

    /// Rows of data, in the order the backend produced them.
    #[serde(default)]
    pub rows: Vec<Row>,

    /// Number of rows in `rows`.
    #[serde(default)]
    pub row_count: usize,
}

impl StatementResults {
    /// Wraps materialized rows, deriving `row_count` from them.
    pub fn new(sql: impl Into<String>, columns: Vec<ColumnMetadata>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            sql: sql.into(),
            columns,
            rows,
            row_count,
        }
    }
}

/// Ordered results of every statement in a submitted query.
///
/// Serialized as `{"root": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Results {
    #[serde(default)]
    pub root: Vec<StatementResults>,
}

impl Results {
    pub fn new(root: Vec<StatementResults>) -> Self {
        Self { root }
    }

    /// Results of a failed query.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    /// The first statement's results, if any.
    pub fn first(&self) -> Option<&StatementResults> {
        self.root.first()
    }
}
