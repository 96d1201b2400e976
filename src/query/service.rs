//! Query submission and lookup.

use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tracing::{error, info};
use uuid::Uuid;

use super::executor::QueryExecutor;
use super::model::{Query, QueryCreate, QueryState, QueryWithResults};
use crate::config::{Config, ExecutionConfig, ResultsBackendKind};
use crate::db::{ExecutionContext, TableColumn, WarehouseAdapter, WarehouseSettings};
use crate::engine::{Engine, EngineType};
use crate::error::{DjqError, Result};
use crate::persistence::{
    engines, queries, FileSystemResults, ResultsBackend, SqliteResults, StateDb,
};

/// Entry point for submitting queries and reading them back.
#[derive(Clone)]
pub struct QueryService {
    pool: SqlitePool,
    executor: QueryExecutor,
    results: Arc<dyn ResultsBackend>,
    execution: ExecutionConfig,
    warehouse: WarehouseSettings,
}

impl QueryService {
    pub fn new(
        pool: SqlitePool,
        results: Arc<dyn ResultsBackend>,
        execution: ExecutionConfig,
        warehouse: WarehouseSettings,
    ) -> Self {
        Self {
            executor: QueryExecutor::new(pool.clone(), Arc::clone(&results)),
            pool,
            results,
            execution,
            warehouse,
        }
    }

    /// Opens the state database and results store named by `config` and
    /// registers its engines.
    pub async fn open(config: &Config) -> Result<Self> {
        let db = match &config.state.path {
            Some(path) => StateDb::open(path).await?,
            None => StateDb::open_default().await?,
        };

        let results: Arc<dyn ResultsBackend> = match config.results.backend {
            ResultsBackendKind::Sqlite => Arc::new(SqliteResults::new(db.pool().clone())),
            ResultsBackendKind::Filesystem => {
                Arc::new(FileSystemResults::new(config.results.directory())?)
            }
        };

        let service = Self::new(
            db.pool().clone(),
            results,
            config.execution.clone(),
            config.warehouse.settings(),
        );
        for engine in &config.engines {
            service.register_engine(engine).await?;
        }
        Ok(service)
    }

    pub fn execution(&self) -> &ExecutionConfig {
        &self.execution
    }

    /// Submits a query.
    ///
    /// Synchronous submissions return the terminal record. Asynchronous ones
    /// are persisted as `SCHEDULED`, run in the background and return at once.
    pub async fn submit(
        &self,
        create: QueryCreate,
        connection_override: Option<String>,
    ) -> Result<QueryWithResults> {
        if create.submitted_query.trim().is_empty() {
            return Err(DjqError::validation("Submitted query is empty"));
        }
        let (engine_name, engine_version) =
            self.resolve_engine(create.engine_name, create.engine_version)?;
        let catalog = create
            .catalog_name
            .unwrap_or_else(|| self.execution.default_catalog.clone());

        let query = Query::new(&catalog, engine_name, engine_version, create.submitted_query);
        let ctx = self.context(&catalog, connection_override);
        info!(id = %query.id, async_ = create.async_, "Query submitted");

        if !create.async_ {
            return self.executor.process_query(query, &ctx).await;
        }

        let mut scheduled = query;
        scheduled.advance(QueryState::Scheduled)?;
        scheduled.scheduled = Some(Utc::now());
        queries::save_query(&self.pool, &scheduled, &[]).await?;

        let executor = self.executor.clone();
        let background = scheduled.clone();
        tokio::spawn(async move {
            let id = background.id;
            if let Err(e) = executor.process_query(background, &ctx).await {
                error!(%id, "Failed to record query outcome: {}", e);
            }
        });

        Ok(QueryWithResults::new(scheduled, Default::default(), Vec::new()))
    }

    /// Loads a query with its results. Results are empty until written.
    pub async fn get(&self, id: Uuid) -> Result<Option<QueryWithResults>> {
        let Some((query, errors)) = queries::get_query(&self.pool, id).await? else {
            return Ok(None);
        };
        let results = self.results.get_results(id).await?.unwrap_or_default();
        Ok(Some(QueryWithResults::new(query, results, errors)))
    }

    pub async fn engines(&self) -> Result<Vec<Engine>> {
        engines::list_engines(&self.pool).await
    }

    pub async fn register_engine(&self, engine: &Engine) -> Result<()> {
        engines::upsert_engine(&self.pool, engine).await?;
        info!(name = %engine.name, version = %engine.version, "Engine registered");
        Ok(())
    }

    /// Lists a warehouse table's columns through the named engine.
    pub async fn table_columns(
        &self,
        engine_name: Option<String>,
        engine_version: Option<String>,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<TableColumn>> {
        let (name, version) = self.resolve_engine(engine_name, engine_version)?;
        let engine = engines::get_engine(&self.pool, &name, &version)
            .await?
            .ok_or_else(|| DjqError::not_found(format!("engine {name} {version}"), catalog))?;

        if engine.engine_type != EngineType::Snowflake {
            return Err(DjqError::validation(format!(
                "Engine {name} {version} ({}) does not support column introspection",
                engine.engine_type
            )));
        }

        WarehouseAdapter::new(engine)
            .table_columns(
                catalog,
                schema,
                table,
                &self.warehouse,
                self.execution.query_timeout(),
            )
            .await
    }

    fn resolve_engine(
        &self,
        name: Option<String>,
        version: Option<String>,
    ) -> Result<(String, String)> {
        match (name, version) {
            (Some(name), Some(version)) => Ok((name, version)),
            (None, None) => self
                .execution
                .default_engine()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .ok_or_else(|| {
                    DjqError::validation("No engine specified and no default engine configured")
                }),
            _ => Err(DjqError::validation(
                "engine_name and engine_version must be given together",
            )),
        }
    }

    fn context(&self, catalog: &str, connection_override: Option<String>) -> ExecutionContext {
        ExecutionContext {
            catalog: catalog.to_string(),
            connection_override,
            query_timeout: self.execution.query_timeout(),
            warehouse: self.warehouse.clone(),
        }
    }
}
