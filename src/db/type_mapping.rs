//! Native column type → canonical type mapping.
//!
//! Two mappers live here:
//! - the coarse mapper used by the generic adapter, which sorts a driver's
//!   type token into one of four canonical buckets using that driver's
//!   vocabulary;
//! - the finer warehouse mapper, which understands named types such as
//!   `NUMBER(10,2)` or `TIMESTAMP_NTZ`.

use std::fmt;

use serde::{Serialize, Serializer};

use super::types::{ColumnMetadata, ColumnType};

/// A driver's type vocabulary, grouped by canonical bucket.
///
/// Tokens are matched case-insensitively against the base type name
/// (anything before a `(`).
#[derive(Debug, Clone, Copy)]
pub struct TypeVocabulary {
    pub driver: &'static str,
    pub string: &'static [&'static str],
    pub binary: &'static [&'static str],
    pub number: &'static [&'static str],
    pub datetime: &'static [&'static str],
}

/// Type names reported by sqlx's PostgreSQL driver.
pub const POSTGRES_TYPES: TypeVocabulary = TypeVocabulary {
    driver: "postgres",
    string: &[
        "TEXT", "VARCHAR", "BPCHAR", "CHAR", "NAME", "UUID", "JSON", "JSONB", "XML", "CITEXT",
    ],
    binary: &["BYTEA"],
    number: &[
        "INT2", "INT4", "INT8", "FLOAT4", "FLOAT8", "NUMERIC", "OID", "MONEY",
    ],
    datetime: &[
        "DATE",
        "TIME",
        "TIMETZ",
        "TIMESTAMP",
        "TIMESTAMPTZ",
        "INTERVAL",
    ],
};

/// Type names reported by sqlx's SQLite driver.
pub const SQLITE_TYPES: TypeVocabulary = TypeVocabulary {
    driver: "sqlite",
    string: &["TEXT"],
    binary: &["BLOB"],
    number: &["INTEGER", "REAL", "NUMERIC"],
    datetime: &["DATE", "TIME", "DATETIME"],
};

impl TypeVocabulary {
    /// Maps a native type token to a canonical type. Unknown tokens map to `String`.
    pub fn canonical(&self, native_type: &str) -> ColumnType {
        let upper = native_type.to_uppercase();
        let base = upper.split('(').next().unwrap_or(&upper).trim();

        let buckets = [
            (self.string, ColumnType::String),
            (self.binary, ColumnType::Bytes),
            (self.number, ColumnType::Float),
            (self.datetime, ColumnType::Datetime),
        ];

        buckets
            .iter()
            .find(|(tokens, _)| tokens.contains(&base))
            .map(|(_, column_type)| *column_type)
            .unwrap_or_default()
    }
}

/// Builds column metadata from a native column descriptor.
pub fn map_column(name: &str, native_type: &str, vocabulary: &TypeVocabulary) -> ColumnMetadata {
    ColumnMetadata::new(name, vocabulary.canonical(native_type))
}

/// Default precision for an unparameterized or malformed decimal.
pub const DEFAULT_DECIMAL_PRECISION: u8 = 38;

/// Default scale for an unparameterized or malformed decimal.
pub const DEFAULT_DECIMAL_SCALE: u8 = 0;

/// Maximum decimal precision the warehouse supports.
const MAX_DECIMAL_PRECISION: u8 = 38;

/// Column types understood by the warehouse mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseType {
    Integer,
    BigInt,
    Decimal { precision: u8, scale: u8 },
    Float,
    Double,
    String,
    Date,
    Timestamp,
    Time,
    Boolean,
}

impl WarehouseType {
    /// The default-parameter decimal.
    pub fn default_decimal() -> Self {
        Self::Decimal {
            precision: DEFAULT_DECIMAL_PRECISION,
            scale: DEFAULT_DECIMAL_SCALE,
        }
    }

    /// Collapses the finer type into the canonical vocabulary.
    pub fn canonical(&self) -> ColumnType {
        match self {
            Self::Integer | Self::BigInt | Self::Decimal { .. } | Self::Float | Self::Double => {
                ColumnType::Float
            }
            Self::Date | Self::Timestamp | Self::Time => ColumnType::Datetime,
            Self::String | Self::Boolean => ColumnType::String,
        }
    }
}

impl fmt::Display for WarehouseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => f.write_str("int"),
            Self::BigInt => f.write_str("bigint"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::String => f.write_str("string"),
            Self::Date => f.write_str("date"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::Time => f.write_str("time"),
            Self::Boolean => f.write_str("boolean"),
        }
    }
}

impl Serialize for WarehouseType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Maps a warehouse type name (e.g. `NUMBER(10,2)`, `VARCHAR`, `TIMESTAMP_NTZ`).
///
/// Never fails: unknown names map to `String`, malformed decimal parameters
/// map to the default decimal.
pub fn map_warehouse_type(type_name: &str) -> WarehouseType {
    let upper = type_name.trim().to_uppercase();
    let base = upper.split('(').next().unwrap_or(&upper).trim();

    match base {
        "NUMBER" | "DECIMAL" | "NUMERIC" | "FIXED" => parse_decimal_params(type_name),
        "INT" | "INTEGER" | "SMALLINT" | "TINYINT" | "BYTEINT" => WarehouseType::Integer,
        "BIGINT" => WarehouseType::BigInt,
        "FLOAT" | "FLOAT4" | "FLOAT8" | "REAL" => WarehouseType::Float,
        "DOUBLE" | "DOUBLE PRECISION" => WarehouseType::Double,
        "VARCHAR" | "STRING" | "TEXT" | "CHAR" | "CHARACTER" => WarehouseType::String,
        "DATE" => WarehouseType::Date,
        "TIMESTAMP" | "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" | "DATETIME" => {
            WarehouseType::Timestamp
        }
        "TIME" => WarehouseType::Time,
        "BOOLEAN" => WarehouseType::Boolean,
        _ => WarehouseType::String,
    }
}

/// Parses `(precision, scale)` from a decimal type string.
///
/// Any unparsable or out-of-range parameter yields the default decimal.
fn parse_decimal_params(type_name: &str) -> WarehouseType {
    let (Some(start), Some(end)) = (type_name.find('('), type_name.rfind(')')) else {
        return WarehouseType::default_decimal();
    };
    if end <= start {
        return WarehouseType::default_decimal();
    }

    let parts: Vec<&str> = type_name[start + 1..end].split(',').map(str::trim).collect();
    let parsed = match parts.as_slice() {
        [p] => p.parse::<u8>().ok().map(|p| (p, DEFAULT_DECIMAL_SCALE)),
        [p, s] => p.parse::<u8>().ok().zip(s.parse::<u8>().ok()),
        _ => None,
    };

    match parsed {
        Some((precision, scale))
            if (1..=MAX_DECIMAL_PRECISION).contains(&precision) && scale <= precision =>
        {
            WarehouseType::Decimal { precision, scale }
        }
        _ => WarehouseType::default_decimal(),
    }
}
