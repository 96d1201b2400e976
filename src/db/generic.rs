//! Generic SQL adapter over a connection string.
//!
//! Supports PostgreSQL and SQLite through sqlx. A connection is opened per
//! query, used for every statement in the batch and closed on the way out.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgConnection, PgRow, Postgres};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column as SqlxColumn, Connection, Executor, Row as SqlxRow, Statement, TypeInfo, ValueRef};
use tracing::{debug, info, warn};
use url::Url;

use super::statements::split_statements;
use super::type_mapping::{map_column, TypeVocabulary, POSTGRES_TYPES, SQLITE_TYPES};
use super::types::{ColumnMetadata, Row, Value};
use super::StatementOutput;
use crate::error::{DjqError, Result};

/// Drivers reachable through a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDriver {
    Postgres,
    Sqlite,
}

impl SqlDriver {
    /// Resolves the driver from the URI scheme.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let Some((scheme, _)) = uri.split_once(':') else {
            return Err(DjqError::backend(format!(
                "Connection URI '{uri}' has no scheme"
            )));
        };
        match scheme.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(DjqError::backend(format!(
                "Unsupported connection scheme '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    fn vocabulary(&self) -> &'static TypeVocabulary {
        match self {
            Self::Postgres => &POSTGRES_TYPES,
            Self::Sqlite => &SQLITE_TYPES,
        }
    }
}

/// Runs each `;`-separated statement of a query over one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericSqlAdapter {
    uri: String,
    params: BTreeMap<String, String>,
}

impl GenericSqlAdapter {
    /// Creates an adapter for the given connection string.
    ///
    /// The scheme is not checked here; an unsupported one fails at run time.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds connection parameters, appended to the URI query string unless
    /// the URI already sets them.
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Executes the query, returning one output per statement in order.
    pub async fn run(&self, sql: &str, catalog: &str) -> Result<Vec<StatementOutput>> {
        let driver = SqlDriver::from_uri(&self.uri)?;
        let statements = split_statements(sql);
        let conn_str = self.connection_string()?;
        info!(
            driver = driver.as_str(),
            statements = statements.len(),
            "Opening generic SQL connection"
        );

        match driver {
            SqlDriver::Postgres => {
                let mut conn = PgConnection::connect(&conn_str)
                    .await
                    .map_err(|e| connection_error(e, driver))?;
                let outcome = run_postgres(&mut conn, &statements).await;
                if let Err(e) = conn.close().await {
                    debug!("Error closing connection: {}", e);
                }
                outcome.map_err(|e| classify_error(e, catalog))
            }
            SqlDriver::Sqlite => {
                let mut conn = SqliteConnection::connect(&conn_str)
                    .await
                    .map_err(|e| connection_error(e, driver))?;
                let outcome = run_sqlite(&mut conn, &statements).await;
                if let Err(e) = conn.close().await {
                    debug!("Error closing connection: {}", e);
                }
                outcome.map_err(|e| classify_error(e, catalog))
            }
        }
    }

    fn connection_string(&self) -> Result<String> {
        if self.params.is_empty() {
            return Ok(self.uri.clone());
        }

        let mut url = Url::parse(&self.uri)
            .map_err(|e| DjqError::backend(format!("Invalid connection URI: {e}")))?;
        let existing: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                if !existing.contains(key) {
                    pairs.append_pair(key, value);
                }
            }
        }
        Ok(url.to_string())
    }
}

async fn run_postgres(
    conn: &mut PgConnection,
    statements: &[String],
) -> std::result::Result<Vec<StatementOutput>, sqlx::Error> {
    let mut outputs = Vec::with_capacity(statements.len());

    for sql in statements {
        debug!(sql = %sql, "Executing statement");
        let rows: Vec<PgRow> = sqlx::query(sql).fetch_all(&mut *conn).await?;

        let columns = match rows.first() {
            Some(row) => map_columns(row.columns(), SqlDriver::Postgres),
            None => match (&mut *conn).prepare(sql).await {
                Ok(statement) => map_columns(statement.columns(), SqlDriver::Postgres),
                Err(_) => Vec::new(),
            },
        };

        outputs.push(StatementOutput {
            sql: sql.clone(),
            columns,
            rows: rows.iter().map(convert_pg_row).collect(),
        });
    }

    Ok(outputs)
}

async fn run_sqlite(
    conn: &mut SqliteConnection,
    statements: &[String],
) -> std::result::Result<Vec<StatementOutput>, sqlx::Error> {
    let mut outputs = Vec::with_capacity(statements.len());

    for sql in statements {
        debug!(sql = %sql, "Executing statement");
        let rows: Vec<SqliteRow> = sqlx::query(sql).fetch_all(&mut *conn).await?;

        let columns = match rows.first() {
            Some(row) => map_columns(row.columns(), SqlDriver::Sqlite),
            None => match (&mut *conn).prepare(sql).await {
                Ok(statement) => map_columns(statement.columns(), SqlDriver::Sqlite),
                Err(_) => Vec::new(),
            },
        };

        outputs.push(StatementOutput {
            sql: sql.clone(),
            columns,
            rows: rows.iter().map(convert_sqlite_row).collect(),
        });
    }

    Ok(outputs)
}

fn map_columns<C: SqlxColumn>(columns: &[C], driver: SqlDriver) -> Vec<ColumnMetadata> {
    columns
        .iter()
        .map(|col| map_column(col.name(), col.type_info().name(), driver.vocabulary()))
        .collect()
}

/// Converts a sqlx PgRow to our Row type.
fn convert_pg_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_pg_value(row, i, col.type_info().name()))
        .collect()
}

fn decode<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_pg_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let value = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => decode::<bool>(row, index).map(Value::Bool),
        "INT2" | "SMALLINT" => decode::<i16>(row, index).map(|v| Value::Int(v as i64)),
        "INT4" | "INT" | "INTEGER" => decode::<i32>(row, index).map(|v| Value::Int(v as i64)),
        "INT8" | "BIGINT" => decode::<i64>(row, index).map(Value::Int),
        "FLOAT4" | "REAL" => decode::<f32>(row, index).map(|v| Value::Float(v as f64)),
        "FLOAT8" | "DOUBLE PRECISION" => decode::<f64>(row, index).map(Value::Float),
        "NUMERIC" => decode::<rust_decimal::Decimal>(row, index)
            .and_then(|d| d.to_f64())
            .map(Value::Float),
        "BYTEA" => decode::<Vec<u8>>(row, index).map(Value::Bytes),
        "DATE" => decode::<chrono::NaiveDate>(row, index).map(|d| Value::String(d.to_string())),
        "TIME" => decode::<chrono::NaiveTime>(row, index).map(|t| Value::String(t.to_string())),
        "TIMESTAMP" => decode::<chrono::NaiveDateTime>(row, index)
            .map(|ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMPTZ" => decode::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|ts| Value::String(ts.to_rfc3339())),
        "JSON" | "JSONB" => decode::<serde_json::Value>(row, index).map(Value::Json),
        "UUID" => decode::<uuid::Uuid>(row, index).map(|u| Value::String(u.to_string())),
        // For all other types, try to get as string
        _ => decode::<String>(row, index).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// Converts a sqlx SqliteRow to our Row type.
///
/// SQLite is dynamically typed, so values are decoded by their runtime
/// storage class rather than the declared column type.
fn convert_sqlite_row(row: &SqliteRow) -> Row {
    (0..row.columns().len())
        .map(|i| convert_sqlite_value(row, i))
        .collect()
}

fn convert_sqlite_value(row: &SqliteRow, index: usize) -> Value {
    let storage_class = match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => raw.type_info().name().to_uppercase(),
        _ => return Value::Null,
    };

    let value = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(index).ok().map(Value::Int),
        "REAL" | "NUMERIC" => row.try_get_unchecked::<f64, _>(index).ok().map(Value::Float),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .ok()
            .map(Value::Bytes),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .ok()
            .map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// Extracts the missing object's name from a driver message, if it reports one.
fn missing_object(message: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [r#"relation "([^"]+)" does not exist"#, r"no such table: ([\w.]+)"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    });

    patterns
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Translates a driver error into the crate taxonomy.
fn classify_error(error: sqlx::Error, catalog: &str) -> DjqError {
    let message = format_query_error(&error);
    if let Some(object) = missing_object(&message) {
        warn!("Object not found in catalog {}: {}", catalog, object);
        return DjqError::not_found(object, catalog);
    }
    warn!("Generic SQL backend error: {}", message);
    DjqError::backend(message)
}

fn connection_error(error: sqlx::Error, driver: SqlDriver) -> DjqError {
    warn!("Could not connect to {} backend: {}", driver.as_str(), error);
    DjqError::backend(format!(
        "Could not connect to {} backend: {}",
        driver.as_str(),
        error
    ))
}

/// Formats a query error with detail and hint where the driver provides them.
fn format_query_error(error: &sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}
