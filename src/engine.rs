//! Engine reference data.
//!
//! An engine names an execution target: which adapter runs against it, where
//! it lives, and any free-form connection parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend kind of an engine.
///
/// The known tags select a dedicated adapter; anything else is carried as
/// `Other` and runs through the generic SQL adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EngineType {
    Duckdb,
    Snowflake,
    Sqlalchemy,
    Other(String),
}

impl EngineType {
    /// Returns the engine type as a string for persistence.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Duckdb => "duckdb",
            Self::Snowflake => "snowflake",
            Self::Sqlalchemy => "sqlalchemy",
            Self::Other(tag) => tag,
        }
    }

    /// Parses an engine type tag. Never fails; unknown tags become `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "duckdb" => Self::Duckdb,
            "snowflake" => Self::Snowflake,
            "sqlalchemy" | "sql" | "generic" => Self::Sqlalchemy,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl From<String> for EngineType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<EngineType> for String {
    fn from(t: EngineType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An execution target, resolved by `(name, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engine {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub engine_type: EngineType,
    pub uri: String,
    #[serde(default)]
    pub extra_params: BTreeMap<String, serde_json::Value>,
}

impl Engine {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        engine_type: EngineType,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            engine_type,
            uri: uri.into(),
            extra_params: BTreeMap::new(),
        }
    }

    /// Adds a connection parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }

    /// Returns a connection parameter rendered as text.
    ///
    /// String parameters are returned without JSON quoting; `null` is absent.
    pub fn param(&self, key: &str) -> Option<String> {
        match self.extra_params.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
