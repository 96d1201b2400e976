//! Query execution and lifecycle transitions.
//!
//! Runs a query through the selected adapter, advances its state, writes its
//! results exactly once and persists the record.

use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tracing::{info, info_span, warn, Instrument};

use super::model::{Query, QueryState, QueryWithResults};
use crate::db::{Adapter, ExecutionContext, Results};
use crate::error::{DjqError, Result};
use crate::persistence::{engines, queries, ResultsBackend};

/// How a query run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Finished(Results),
    /// The run failed; carries exactly one error message.
    Failed(Vec<String>),
}

impl ExecutionOutcome {
    /// Folds an adapter result into an outcome. Partial results are never kept.
    pub fn from_result(result: Result<Results>) -> Self {
        match result {
            Ok(results) => Self::Finished(results),
            Err(e) => Self::Failed(vec![e.to_string()]),
        }
    }

    pub fn state(&self) -> QueryState {
        match self {
            Self::Finished(_) => QueryState::Finished,
            Self::Failed(_) => QueryState::Failed,
        }
    }
}

/// Executes queries against their engines.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: SqlitePool,
    results: Arc<dyn ResultsBackend>,
}

impl QueryExecutor {
    /// Creates an executor over the state database and a results store.
    pub fn new(pool: SqlitePool, results: Arc<dyn ResultsBackend>) -> Self {
        Self { pool, results }
    }

    /// Runs `query` to a terminal state.
    ///
    /// Execution failures never escape: they end the query in `FAILED` with
    /// empty results and a single error. An `Err` here means the outcome could
    /// not be recorded.
    pub async fn process_query(
        &self,
        query: Query,
        ctx: &ExecutionContext,
    ) -> Result<QueryWithResults> {
        let span = info_span!(
            "query",
            id = %query.id,
            engine = %query.engine_name,
            version = %query.engine_version
        );
        self.process(query, ctx).instrument(span).await
    }

    async fn process(&self, mut query: Query, ctx: &ExecutionContext) -> Result<QueryWithResults> {
        query.advance(QueryState::Scheduled)?;
        query.scheduled.get_or_insert_with(Utc::now);
        query.executed_query = Some(query.submitted_query.clone());
        query.started = Some(Utc::now());

        let outcome = ExecutionOutcome::from_result(self.execute(&query, ctx).await);
        query.advance(outcome.state())?;

        let (results, errors) = match outcome {
            ExecutionOutcome::Finished(results) => {
                query.progress = 1.0;
                info!(statements = results.len(), "Query finished");
                (results, Vec::new())
            }
            ExecutionOutcome::Failed(errors) => {
                warn!(error = %errors.join("; "), "Query failed");
                (Results::empty(), errors)
            }
        };
        query.finished = Some(Utc::now());

        // Results land before the terminal row so readers never see a
        // terminal query whose results are missing.
        self.results.put_results(query.id, &results).await?;
        if !queries::save_query(&self.pool, &query, &errors).await? {
            return Err(DjqError::internal(format!(
                "Query {} was already in a terminal state",
                query.id
            )));
        }

        Ok(QueryWithResults::new(query, results, errors))
    }

    /// Resolves the engine, selects the adapter and materializes every statement.
    async fn execute(&self, query: &Query, ctx: &ExecutionContext) -> Result<Results> {
        let engine = engines::get_engine(&self.pool, &query.engine_name, &query.engine_version)
            .await?
            .ok_or_else(|| {
                DjqError::not_found(
                    format!("engine {} {}", query.engine_name, query.engine_version),
                    &query.catalog_name,
                )
            })?;

        let adapter = Adapter::select(&engine, ctx.connection_override.as_deref());
        info!(adapter = adapter.kind(), "Executing query");

        let outputs = adapter.run(&query.submitted_query, ctx).await?;
        Ok(Results::new(outputs.into_iter().map(Into::into).collect()))
    }
}
