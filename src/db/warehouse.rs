//! Cloud warehouse adapter (Snowflake SQL API v2).
//!
//! A "session" is one HTTP client scoped to a single query. Statements are
//! submitted to `/api/v2/statements`; a 202 answer carries a statement handle
//! that is polled until the result is ready, and multi-partition results are
//! fetched partition by partition in order.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::type_mapping::{map_warehouse_type, WarehouseType};
use super::types::{Row, Value};
use super::StatementOutput;
use crate::engine::Engine;
use crate::error::{DjqError, Result};

const STATEMENTS_PATH: &str = "/api/v2/statements";

/// Header naming the kind of bearer credential presented.
pub const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// Error code the warehouse reports for a missing or unauthorized object.
const MISSING_OBJECT_CODE: &str = "002003";

/// Default environment variable holding the warehouse credential.
pub const DEFAULT_CREDENTIAL_ENV: &str = "SNOWFLAKE_TOKEN";

/// Default credential kind.
pub const DEFAULT_TOKEN_TYPE: &str = "KEYPAIR_JWT";

/// Credential and polling settings for warehouse sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseSettings {
    /// The externally supplied bearer credential.
    pub token: Option<String>,
    pub token_type: String,
    /// Where the credential came from, for error messages.
    pub credential_env: String,
    /// Delay between status polls of a running statement.
    pub poll_interval: Duration,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            token: None,
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WarehouseSettings {
    /// Reads the credential from the named environment variable.
    pub fn from_env(credential_env: &str, token_type: &str, poll_interval: Duration) -> Self {
        Self {
            token: std::env::var(credential_env).ok().filter(|t| !t.is_empty()),
            token_type: token_type.to_string(),
            credential_env: credential_env.to_string(),
            poll_interval,
        }
    }
}

/// Connection target resolved from an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub base_url: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

impl WarehouseTarget {
    /// Resolves the target from `snowflake://<account>/<database>/<schema>?warehouse=..&role=..`.
    ///
    /// Each setting is taken from the URI first and then from the engine's
    /// parameters. A `host` parameter overrides the account-derived base URL.
    pub fn from_engine(engine: &Engine) -> Result<Self> {
        let url = Url::parse(&engine.uri).map_err(|e| {
            DjqError::config(format!("Invalid warehouse URI '{}': {e}", engine.uri))
        })?;
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let pick = |key: &str| query.get(key).cloned().or_else(|| engine.param(key));

        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        let base_url = match engine.param("host") {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("https://{}", host.trim_end_matches('/')),
            None => {
                let account = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .or_else(|| engine.param("account"))
                    .ok_or_else(|| {
                        DjqError::config(format!(
                            "Warehouse URI '{}' names no account",
                            engine.uri
                        ))
                    })?;
                format!("https://{account}.snowflakecomputing.com")
            }
        };

        Ok(Self {
            base_url,
            database: segments.first().cloned().or_else(|| pick("database")),
            schema: segments.get(1).cloned().or_else(|| pick("schema")),
            warehouse: pick("warehouse"),
            role: pick("role"),
        })
    }
}

/// A column of a warehouse table, typed with the finer warehouse vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: WarehouseType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseAdapter {
    engine: Engine,
}

impl WarehouseAdapter {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Executes the submitted text as a single statement.
    ///
    /// Columns are not introspected on this path.
    pub async fn run(
        &self,
        sql: &str,
        catalog: &str,
        settings: &WarehouseSettings,
        timeout: Duration,
    ) -> Result<Vec<StatementOutput>> {
        let target = WarehouseTarget::from_engine(&self.engine)?;
        let session = Session::open(&target, settings, timeout)?;
        info!(base_url = %target.base_url, "Opening warehouse session");

        let request = StatementRequest::new(sql, &target, timeout);
        let (row_types, data) = session
            .execute(&request)
            .await
            .map_err(|e| e.into_query_error(catalog))?;

        let rows = data
            .into_iter()
            .map(|raw| coerce_row(raw, &row_types))
            .collect();

        Ok(vec![StatementOutput {
            sql: sql.to_string(),
            columns: Vec::new(),
            rows,
        }])
    }

    /// Lists a table's columns from the warehouse information schema.
    pub async fn table_columns(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        settings: &WarehouseSettings,
        timeout: Duration,
    ) -> Result<Vec<TableColumn>> {
        let target = WarehouseTarget::from_engine(&self.engine)?;
        let database = target.database.clone().ok_or_else(|| {
            DjqError::config(format!(
                "Engine {} has no warehouse database configured",
                self.engine.name
            ))
        })?;
        if !is_plain_identifier(&database) {
            return Err(DjqError::validation(format!(
                "Invalid warehouse database name '{database}'"
            )));
        }
        let qualified = format!("{database}.{schema}.{table}");

        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, NUMERIC_PRECISION, NUMERIC_SCALE \
             FROM {database}.INFORMATION_SCHEMA.COLUMNS \
             WHERE UPPER(TABLE_SCHEMA) = UPPER(?) AND UPPER(TABLE_NAME) = UPPER(?) \
             ORDER BY ORDINAL_POSITION"
        );
        let mut request = StatementRequest::new(&sql, &target, timeout);
        request.bind_text(1, schema);
        request.bind_text(2, table);

        let session = Session::open(&target, settings, timeout)?;
        let (_, data) = session.execute(&request).await.map_err(|e| {
            if e.is_missing_object() {
                warn!("Table not found: {} (catalog: {})", qualified, catalog);
                return DjqError::not_found(qualified.clone(), catalog);
            }
            match e {
                CallError::Api { message, .. } => DjqError::backend(format!(
                    "Error retrieving columns from warehouse: {message}"
                )),
                CallError::Unexpected(message) => DjqError::unexpected(format!(
                    "Unexpected error retrieving columns: {message}"
                )),
            }
        })?;

        if data.is_empty() {
            warn!("No columns found for table {} (catalog: {})", qualified, catalog);
            return Err(DjqError::not_found(qualified, catalog));
        }

        Ok(data.into_iter().filter_map(table_column).collect())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Builds a column from an information-schema row
/// `(COLUMN_NAME, DATA_TYPE, NUMERIC_PRECISION, NUMERIC_SCALE)`.
fn table_column(row: Vec<Option<String>>) -> Option<TableColumn> {
    let mut fields = row.into_iter();
    let name = fields.next().flatten()?;
    let data_type = fields.next().flatten().unwrap_or_default();
    let precision = fields.next().flatten();
    let scale = fields.next().flatten();

    let type_name = match (precision, scale) {
        (Some(p), Some(s)) if data_type.eq_ignore_ascii_case("NUMBER") => {
            format!("{data_type}({p},{s})")
        }
        _ => data_type,
    };

    Some(TableColumn {
        name,
        column_type: map_warehouse_type(&type_name),
    })
}

#[derive(Debug, Serialize)]
struct Binding {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, Binding>,
}

impl<'a> StatementRequest<'a> {
    fn new(statement: &'a str, target: &'a WarehouseTarget, timeout: Duration) -> Self {
        Self {
            statement,
            timeout: timeout.as_secs(),
            database: target.database.as_deref(),
            schema: target.schema.as_deref(),
            warehouse: target.warehouse.as_deref(),
            role: target.role.as_deref(),
            bindings: BTreeMap::new(),
        }
    }

    fn bind_text(&mut self, position: usize, value: &str) {
        self.bindings.insert(
            position.to_string(),
            Binding {
                kind: "TEXT",
                value: value.to_string(),
            },
        );
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    code: Option<String>,
    message: Option<String>,
    statement_handle: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RowType {
    #[serde(rename = "type")]
    kind: String,
    scale: Option<i64>,
}

/// Failure of a warehouse API call, before it is mapped to the crate taxonomy.
#[derive(Debug)]
enum CallError {
    /// The warehouse answered with an error payload.
    Api {
        code: Option<String>,
        message: String,
    },
    /// Transport failures and payloads that could not be understood.
    Unexpected(String),
}

impl CallError {
    fn is_missing_object(&self) -> bool {
        match self {
            Self::Api { code, message } => {
                code.as_deref() == Some(MISSING_OBJECT_CODE) || message.contains("does not exist")
            }
            Self::Unexpected(_) => false,
        }
    }

    fn into_query_error(self, catalog: &str) -> DjqError {
        if self.is_missing_object() {
            if let Self::Api { message, .. } = &self {
                let object = missing_object(message).unwrap_or_else(|| message.clone());
                warn!("Object not found in catalog {}: {}", catalog, object);
                return DjqError::not_found(object, catalog);
            }
        }
        match self {
            Self::Api { message, .. } => {
                warn!("Warehouse error: {}", message);
                DjqError::backend(message)
            }
            Self::Unexpected(message) => DjqError::unexpected(message),
        }
    }
}

fn missing_object(message: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Object '([^']+)' does not exist").ok())
        .as_ref()?
        .captures(message)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

enum Poll {
    Running(String),
    Complete(StatementResponse),
}

struct Session<'a> {
    client: Client,
    base_url: &'a str,
    token: String,
    token_type: &'a str,
    poll_interval: Duration,
}

impl<'a> Session<'a> {
    fn open(
        target: &'a WarehouseTarget,
        settings: &'a WarehouseSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let token = settings.token.clone().ok_or_else(|| {
            DjqError::config(format!(
                "Warehouse credential not set (expected in ${})",
                settings.credential_env
            ))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DjqError::unexpected(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: &target.base_url,
            token,
            token_type: &settings.token_type,
            poll_interval: settings.poll_interval,
        })
    }

    /// Submits a statement and waits for every partition of its result.
    async fn execute(
        &self,
        request: &StatementRequest<'_>,
    ) -> std::result::Result<(Vec<RowType>, Vec<Vec<Option<String>>>), CallError> {
        let url = format!("{}{}", self.base_url, STATEMENTS_PATH);
        debug!("Submitting statement to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(TOKEN_TYPE_HEADER, self.token_type)
            .header(ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let mut poll = read_response(response).await?;
        let complete = loop {
            match poll {
                Poll::Complete(response) => break response,
                Poll::Running(handle) => {
                    tokio::time::sleep(self.poll_interval).await;
                    debug!("Polling statement status: {}", handle);
                    poll = self.fetch(&handle, None).await?;
                }
            }
        };

        let meta = complete.result_set_meta_data.unwrap_or_default();
        let mut data = complete.data;

        if meta.partition_info.len() > 1 {
            let handle = complete.statement_handle.ok_or_else(|| {
                CallError::Unexpected("Partitioned result without a statement handle".into())
            })?;
            for partition in 1..meta.partition_info.len() {
                match self.fetch(&handle, Some(partition)).await? {
                    Poll::Complete(part) => data.extend(part.data),
                    Poll::Running(_) => {
                        return Err(CallError::Unexpected(format!(
                            "Partition {partition} of {handle} is not ready"
                        )))
                    }
                }
            }
        }

        Ok((meta.row_type, data))
    }

    async fn fetch(
        &self,
        handle: &str,
        partition: Option<usize>,
    ) -> std::result::Result<Poll, CallError> {
        let url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle);
        let mut request = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(TOKEN_TYPE_HEADER, self.token_type)
            .header(ACCEPT, "application/json");
        if let Some(partition) = partition {
            request = request.query(&[("partition", partition)]);
        }

        let response = request.send().await.map_err(transport_error)?;
        read_response(response).await
    }
}

fn transport_error(error: reqwest::Error) -> CallError {
    CallError::Unexpected(format!("Warehouse request failed: {error}"))
}

async fn read_response(response: Response) -> std::result::Result<Poll, CallError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CallError::Unexpected(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(parse_error(status, &body));
    }

    let parsed: StatementResponse = serde_json::from_str(&body).map_err(|e| {
        CallError::Unexpected(format!("Failed to parse warehouse response: {e} - body: {body}"))
    })?;

    if status == StatusCode::ACCEPTED {
        let handle = parsed.statement_handle.ok_or_else(|| {
            CallError::Unexpected("Running statement without a statement handle".into())
        })?;
        return Ok(Poll::Running(handle));
    }

    Ok(Poll::Complete(parsed))
}

fn parse_error(status: StatusCode, body: &str) -> CallError {
    if status == StatusCode::UNAUTHORIZED {
        return CallError::Api {
            code: None,
            message: "Authentication failed. Check the warehouse credential.".to_string(),
        };
    }

    match serde_json::from_str::<StatementResponse>(body) {
        Ok(StatementResponse {
            code,
            message: Some(message),
            ..
        }) => CallError::Api { code, message },
        _ => CallError::Api {
            code: None,
            message: format!("Warehouse API error ({status}): {body}"),
        },
    }
}

fn coerce_row(raw: Vec<Option<String>>, row_types: &[RowType]) -> Row {
    raw.into_iter()
        .enumerate()
        .map(|(i, cell)| match (cell, row_types.get(i)) {
            (None, _) => Value::Null,
            (Some(text), Some(row_type)) => coerce_value(text, row_type),
            (Some(text), None) => Value::String(text),
        })
        .collect()
}

/// Decodes a `jsonv2` cell according to its reported row type.
///
/// Cells that do not parse as their declared type are kept as text.
fn coerce_value(text: String, row_type: &RowType) -> Value {
    let coerced = match row_type.kind.to_lowercase().as_str() {
        "fixed" if row_type.scale.unwrap_or(0) == 0 => text
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| text.parse::<f64>().map(Value::Float))
            .ok(),
        "fixed" | "real" => text.parse::<f64>().ok().map(Value::Float),
        "boolean" => match text.to_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        "date" => text
            .parse::<i64>()
            .ok()
            .and_then(|days| {
                NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(TimeDelta::days(days))
            })
            .map(|d| Value::String(d.to_string())),
        "time" => parse_epoch(&text).and_then(|(secs, nanos)| {
            NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(secs).ok()?, nanos)
                .map(|t| Value::String(t.to_string()))
        }),
        "timestamp_ntz" | "timestamp_ltz" => parse_epoch(&text).and_then(|(secs, nanos)| {
            DateTime::from_timestamp(secs, nanos).map(|ts| {
                Value::String(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            })
        }),
        "timestamp_tz" => parse_timestamp_tz(&text),
        "binary" => decode_hex(&text).map(Value::Bytes),
        "variant" | "object" | "array" => serde_json::from_str(&text).ok().map(Value::Json),
        _ => None,
    };
    coerced.unwrap_or(Value::String(text))
}

/// Parses signed `seconds[.fraction]` into whole seconds and nanoseconds.
///
/// The sign applies to the whole value, so `-1.5` is `(-2, 500_000_000)`.
fn parse_epoch(text: &str) -> Option<(i64, u32)> {
    let (negative, magnitude) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, frac) = magnitude.split_once('.').unwrap_or((magnitude, ""));
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole = whole.parse::<i64>().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits: String = frac.chars().chain(std::iter::repeat('0')).take(9).collect();
        digits.parse::<u32>().ok()?
    };

    match (negative, nanos) {
        (false, _) => Some((whole, nanos)),
        (true, 0) => Some((-whole, 0)),
        (true, _) => Some((-whole - 1, 1_000_000_000 - nanos)),
    }
}

/// Parses `seconds.fraction offset`, where `offset` is minutes biased by 1440.
fn parse_timestamp_tz(text: &str) -> Option<Value> {
    let (epoch, offset) = text.split_once(' ')?;
    let (secs, nanos) = parse_epoch(epoch)?;
    let offset_minutes = offset.trim().parse::<i32>().ok()? - 1440;
    let zone = FixedOffset::east_opt(offset_minutes * 60)?;
    let ts = DateTime::from_timestamp(secs, nanos)?.with_timezone(&zone);
    Some(Value::String(ts.to_rfc3339()))
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}
