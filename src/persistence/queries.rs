//! Query record persistence.
//!
//! A query row may be rewritten while it is in flight. Once it holds a
//! terminal state it is never changed again.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{DjqError, Result};
use crate::query::{Query, QueryState};

/// Raw database row for a query.
#[derive(Debug, Clone, FromRow)]
struct QueryRow {
    id: String,
    catalog_name: String,
    engine_name: String,
    engine_version: String,
    submitted_query: String,
    executed_query: Option<String>,
    scheduled: Option<DateTime<Utc>>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    state: String,
    progress: f64,
    errors: String,
}

impl TryFrom<QueryRow> for (Query, Vec<String>) {
    type Error = DjqError;

    fn try_from(row: QueryRow) -> Result<Self> {
        let corrupt = |what: &str, detail: String| {
            DjqError::persistence(format!("Corrupt {what} for query {}: {detail}", row.id))
        };

        let id = Uuid::parse_str(&row.id).map_err(|e| corrupt("id", e.to_string()))?;
        let state: QueryState = row
            .state
            .parse()
            .map_err(|e: DjqError| corrupt("state", e.to_string()))?;
        let errors: Vec<String> =
            serde_json::from_str(&row.errors).map_err(|e| corrupt("errors", e.to_string()))?;

        let query = Query {
            id,
            catalog_name: row.catalog_name,
            engine_name: row.engine_name,
            engine_version: row.engine_version,
            submitted_query: row.submitted_query,
            executed_query: row.executed_query,
            scheduled: row.scheduled,
            started: row.started,
            finished: row.finished,
            state,
            progress: row.progress,
        };
        Ok((query, errors))
    }
}

/// Inserts or updates a query record.
///
/// Returns `false` when the stored row is already terminal and was left as is.
pub async fn save_query(pool: &SqlitePool, query: &Query, errors: &[String]) -> Result<bool> {
    let errors = serde_json::to_string(errors)
        .map_err(|e| DjqError::internal(format!("Failed to serialize errors: {e}")))?;

    let result = sqlx::query(
        r#"
        INSERT INTO queries
        (id, catalog_name, engine_name, engine_version, submitted_query, executed_query,
         scheduled, started, finished, state, progress, errors)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            executed_query = excluded.executed_query,
            scheduled = excluded.scheduled,
            started = excluded.started,
            finished = excluded.finished,
            state = excluded.state,
            progress = excluded.progress,
            errors = excluded.errors
        WHERE queries.state NOT IN ('FINISHED', 'CANCELED', 'FAILED')
        "#,
    )
    .bind(query.id.to_string())
    .bind(&query.catalog_name)
    .bind(&query.engine_name)
    .bind(&query.engine_version)
    .bind(&query.submitted_query)
    .bind(&query.executed_query)
    .bind(query.scheduled)
    .bind(query.started)
    .bind(query.finished)
    .bind(query.state.as_str())
    .bind(query.progress)
    .bind(errors)
    .execute(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to save query {}: {e}", query.id)))?;

    Ok(result.rows_affected() > 0)
}

/// Loads a query record and its error list.
pub async fn get_query(pool: &SqlitePool, id: Uuid) -> Result<Option<(Query, Vec<String>)>> {
    let row: Option<QueryRow> = sqlx::query_as(
        r#"
        SELECT id, catalog_name, engine_name, engine_version, submitted_query, executed_query,
               scheduled, started, finished, state, progress, errors
        FROM queries WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to load query {id}: {e}")))?;

    row.map(TryInto::try_into).transpose()
}
