//! Embedded analytical engine adapter (DuckDB).
//!
//! The submitted text runs as a single statement on a connection that lives
//! for one query. Columns are not introspected on this path.

use std::path::PathBuf;

use super::StatementOutput;
use crate::engine::Engine;
use crate::error::{DjqError, Result};

/// URI selecting a private in-memory database.
pub const MEMORY_URI: &str = "duckdb:///:memory:";

/// Where the embedded database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedLocation {
    Memory,
    ReadOnly(PathBuf),
}

impl EmbeddedLocation {
    /// Resolves the location from an engine.
    ///
    /// `duckdb:///:memory:` is in-memory; anything else opens the file named
    /// by the `location` parameter, or by the URI path, read-only.
    pub fn from_engine(engine: &Engine) -> Self {
        if engine.uri == MEMORY_URI {
            return Self::Memory;
        }
        if let Some(location) = engine.param("location") {
            return Self::ReadOnly(PathBuf::from(location));
        }

        let path = engine
            .uri
            .strip_prefix("duckdb://")
            .unwrap_or(&engine.uri);
        match path {
            "" | ":memory:" | "/:memory:" => Self::Memory,
            path => Self::ReadOnly(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedAdapter {
    location: EmbeddedLocation,
}

impl EmbeddedAdapter {
    pub fn new(location: EmbeddedLocation) -> Self {
        Self { location }
    }

    pub fn location(&self) -> &EmbeddedLocation {
        &self.location
    }

    /// Executes the query on a blocking worker thread.
    #[cfg(feature = "duckdb")]
    pub async fn run(&self, sql: &str, catalog: &str) -> Result<Vec<StatementOutput>> {
        tracing::info!(location = ?self.location, "Opening embedded engine connection");

        let location = self.location.clone();
        let statement = sql.trim().to_string();
        let catalog = catalog.to_string();

        tokio::task::spawn_blocking(move || duck::execute(&location, &statement, &catalog))
            .await
            .map_err(|e| DjqError::unexpected(format!("Embedded engine worker failed: {e}")))?
    }

    #[cfg(not(feature = "duckdb"))]
    pub async fn run(&self, _sql: &str, _catalog: &str) -> Result<Vec<StatementOutput>> {
        Err(DjqError::backend(
            "Embedded engine support is not compiled in (enable the `duckdb` feature)",
        ))
    }
}

#[cfg(feature = "duckdb")]
mod duck {
    use std::sync::OnceLock;

    use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta};
    use duckdb::types::{TimeUnit, Value as DuckValue};
    use duckdb::{AccessMode, Config, Connection};
    use regex::Regex;
    use rust_decimal::prelude::ToPrimitive;
    use tracing::{debug, warn};

    use super::EmbeddedLocation;
    use crate::db::types::{Row, Value};
    use crate::db::StatementOutput;
    use crate::error::{DjqError, Result};

    pub(super) fn execute(
        location: &EmbeddedLocation,
        sql: &str,
        catalog: &str,
    ) -> Result<Vec<StatementOutput>> {
        let conn = open(location).map_err(|e| classify_error(e, catalog))?;
        debug!(sql = %sql, "Executing statement");
        let rows = fetch_rows(&conn, sql).map_err(|e| classify_error(e, catalog))?;
        if let Err((_, e)) = conn.close() {
            debug!("Error closing embedded connection: {}", e);
        }

        Ok(vec![StatementOutput {
            sql: sql.to_string(),
            columns: Vec::new(),
            rows,
        }])
    }

    fn open(location: &EmbeddedLocation) -> duckdb::Result<Connection> {
        match location {
            EmbeddedLocation::Memory => Connection::open_in_memory(),
            EmbeddedLocation::ReadOnly(path) => {
                let config = Config::default().access_mode(AccessMode::ReadOnly)?;
                Connection::open_with_flags(path, config)
            }
        }
    }

    fn fetch_rows(conn: &Connection, sql: &str) -> duckdb::Result<Vec<Row>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            let width = row.as_ref().column_count();
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(convert_value(row.get::<_, DuckValue>(i)?));
            }
            out.push(values);
        }

        Ok(out)
    }

    fn to_micros(unit: TimeUnit, value: i64) -> i64 {
        match unit {
            TimeUnit::Second => value.saturating_mul(1_000_000),
            TimeUnit::Millisecond => value.saturating_mul(1_000),
            TimeUnit::Microsecond => value,
            TimeUnit::Nanosecond => value / 1_000,
        }
    }

    /// Converts a DuckDB value. Temporal values become ISO-8601 text; nested
    /// values fall back to their debug rendering.
    fn convert_value(value: DuckValue) -> Value {
        match value {
            DuckValue::Null => Value::Null,
            DuckValue::Boolean(b) => Value::Bool(b),
            DuckValue::TinyInt(v) => Value::Int(v as i64),
            DuckValue::SmallInt(v) => Value::Int(v as i64),
            DuckValue::Int(v) => Value::Int(v as i64),
            DuckValue::BigInt(v) => Value::Int(v),
            DuckValue::UTinyInt(v) => Value::Int(v as i64),
            DuckValue::USmallInt(v) => Value::Int(v as i64),
            DuckValue::UInt(v) => Value::Int(v as i64),
            DuckValue::UBigInt(v) => i64::try_from(v)
                .map(Value::Int)
                .unwrap_or(Value::Float(v as f64)),
            DuckValue::HugeInt(v) => i64::try_from(v)
                .map(Value::Int)
                .unwrap_or(Value::Float(v as f64)),
            DuckValue::Float(v) => Value::Float(v as f64),
            DuckValue::Double(v) => Value::Float(v),
            DuckValue::Decimal(d) => rust_decimal::Decimal::try_from(d)
                .ok()
                .and_then(|d| d.to_f64())
                .map(Value::Float)
                .unwrap_or(Value::Null),
            DuckValue::Text(s) => Value::String(s),
            DuckValue::Enum(s) => Value::String(s),
            DuckValue::Blob(b) => Value::Bytes(b),
            DuckValue::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(days as i64)))
                .map(|d| Value::String(d.to_string()))
                .unwrap_or(Value::Null),
            DuckValue::Timestamp(unit, v) => DateTime::from_timestamp_micros(to_micros(unit, v))
                .map(|ts| {
                    Value::String(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                })
                .unwrap_or(Value::Null),
            DuckValue::Time64(unit, v) => {
                let micros = to_micros(unit, v);
                NaiveTime::from_num_seconds_from_midnight_opt(
                    (micros / 1_000_000) as u32,
                    ((micros % 1_000_000) * 1_000) as u32,
                )
                .map(|t| Value::String(t.to_string()))
                .unwrap_or(Value::Null)
            }
            other => Value::String(format!("{other:?}")),
        }
    }

    fn missing_table(message: &str) -> Option<String> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        PATTERN
            .get_or_init(|| Regex::new(r"Table with name (\S+) does not exist").ok())
            .as_ref()?
            .captures(message)?
            .get(1)
            .map(|m| m.as_str().trim_end_matches('!').to_string())
    }

    fn classify_error(error: duckdb::Error, catalog: &str) -> DjqError {
        let message = error.to_string();
        if let Some(table) = missing_table(&message) {
            warn!("Object not found in catalog {}: {}", catalog, table);
            return DjqError::not_found(table, catalog);
        }
        warn!("Embedded engine error: {}", message);
        DjqError::backend(message)
    }

}
