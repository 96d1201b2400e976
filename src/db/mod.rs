//! Backend adapters.
//!
//! Each adapter turns a submitted query string into a list of per-statement
//! outputs (statement text, columns, materialized rows). The set of adapters
//! is closed; [`Adapter::select`] picks one for every engine.

mod embedded;
mod generic;
pub mod statements;
pub mod type_mapping;
mod types;
mod warehouse;

pub use embedded::{EmbeddedAdapter, EmbeddedLocation, MEMORY_URI};
pub use generic::{GenericSqlAdapter, SqlDriver};
pub use types::{ColumnMetadata, ColumnType, Results, Row, StatementResults, Value};
pub use warehouse::{
    TableColumn, WarehouseAdapter, WarehouseSettings, WarehouseTarget, DEFAULT_CREDENTIAL_ENV,
    DEFAULT_TOKEN_TYPE, TOKEN_TYPE_HEADER,
};

use std::time::Duration;

use tracing::debug;

use crate::engine::{Engine, EngineType};
use crate::error::{DjqError, Result};

/// Default bound on a single adapter call.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Output of one executed statement, before it is packaged as results.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementOutput {
    pub sql: String,
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Row>,
}

impl From<StatementOutput> for StatementResults {
    fn from(output: StatementOutput) -> Self {
        StatementResults::new(output.sql, output.columns, output.rows)
    }
}

/// Per-query settings handed to the adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    /// Catalog the query runs against, for diagnostics.
    pub catalog: String,
    /// Per-request connection string that replaces the engine's own.
    pub connection_override: Option<String>,
    pub query_timeout: Duration,
    pub warehouse: WarehouseSettings,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            catalog: "default".to_string(),
            connection_override: None,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            warehouse: WarehouseSettings::default(),
        }
    }
}

impl ExecutionContext {
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = catalog.into();
        self
    }

    pub fn with_connection_override(mut self, uri: Option<String>) -> Self {
        self.connection_override = uri;
        self
    }
}

/// The adapter chosen for a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Adapter {
    Embedded(EmbeddedAdapter),
    Warehouse(WarehouseAdapter),
    Generic(GenericSqlAdapter),
}

impl Adapter {
    /// Selects the adapter for an engine.
    ///
    /// A connection override always wins and runs on the generic adapter.
    /// Otherwise the engine type decides, and every type without a dedicated
    /// adapter falls back to the generic adapter on the engine's own URI.
    pub fn select(engine: &Engine, connection_override: Option<&str>) -> Self {
        if let Some(uri) = connection_override {
            return Self::Generic(GenericSqlAdapter::new(uri));
        }

        match engine.engine_type {
            EngineType::Duckdb => {
                Self::Embedded(EmbeddedAdapter::new(EmbeddedLocation::from_engine(engine)))
            }
            EngineType::Snowflake => Self::Warehouse(WarehouseAdapter::new(engine.clone())),
            EngineType::Sqlalchemy | EngineType::Other(_) => {
                let params = engine
                    .extra_params
                    .keys()
                    .filter_map(|key| engine.param(key).map(|value| (key.clone(), value)))
                    .collect();
                Self::Generic(GenericSqlAdapter::new(engine.uri.clone()).with_params(params))
            }
        }
    }

    /// Short name of the adapter, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedded(_) => "embedded",
            Self::Warehouse(_) => "warehouse",
            Self::Generic(_) => "generic",
        }
    }

    /// Runs the query, bounded by the context's timeout.
    pub async fn run(&self, sql: &str, ctx: &ExecutionContext) -> Result<Vec<StatementOutput>> {
        debug!(adapter = self.kind(), "Running query");
        let call = async {
            match self {
                Self::Embedded(adapter) => adapter.run(sql, &ctx.catalog).await,
                Self::Warehouse(adapter) => {
                    adapter
                        .run(sql, &ctx.catalog, &ctx.warehouse, ctx.query_timeout)
                        .await
                }
                Self::Generic(adapter) => adapter.run(sql, &ctx.catalog).await,
            }
        };

        tokio::time::timeout(ctx.query_timeout, call)
            .await
            .map_err(|_| {
                DjqError::backend(format!(
                    "Query timed out after {} seconds",
                    ctx.query_timeout.as_secs()
                ))
            })?
    }
}
