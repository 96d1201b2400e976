//! Route handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::translate::TranslatedSql;
use super::AppState;
use crate::db::{ColumnMetadata, TableColumn};
use crate::engine::Engine;
use crate::error::{DjqError, Result};
use crate::query::{QueryCreate, QueryService, QueryState, QueryWithResults};

/// Request header carrying a per-request connection override.
pub const CONNECTION_URI_HEADER: &str = "x-connection-uri";

#[derive(Debug, Deserialize)]
pub struct DjsqlParams {
    query: String,
    #[serde(default)]
    async_: bool,
    engine_name: Option<String>,
    engine_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EngineParams {
    engine_name: Option<String>,
    engine_version: Option<String>,
}

/// `GET /djsql/data`
pub async fn djsql_data(
    State(state): State<AppState>,
    Query(params): Query<DjsqlParams>,
) -> Result<Json<QueryWithResults>> {
    let translated = translate(&state, &params).await?;
    let create = query_create(&translated, params.async_);

    let mut result = state.service.submit(create, None).await?;
    inject_columns(&mut result, translated.columns.as_deref());
    Ok(Json(result))
}

/// `GET /djsql/stream/`
pub async fn djsql_stream(
    State(state): State<AppState>,
    Query(params): Query<DjsqlParams>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let translated = translate(&state, &params).await?;
    let initial = state
        .service
        .submit(query_create(&translated, true), None)
        .await?;

    let events = query_events(
        state.service.clone(),
        initial,
        translated.columns,
        state.stream_interval,
    );
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// `POST /queries/`
pub async fn submit_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(create): Json<QueryCreate>,
) -> Result<Json<QueryWithResults>> {
    let connection_override = headers
        .get(CONNECTION_URI_HEADER)
        .map(|value| {
            value.to_str().map(str::to_string).map_err(|_| {
                DjqError::validation("X-Connection-Uri header is not valid text")
            })
        })
        .transpose()?;

    let result = state.service.submit(create, connection_override).await?;
    Ok(Json(result))
}

/// `GET /queries/{id}`
pub async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueryWithResults>> {
    state.service.get(id).await?.map(Json).ok_or_else(|| {
        DjqError::not_found(
            format!("query {id}"),
            &state.service.execution().default_catalog,
        )
    })
}

/// `GET /engines/`
pub async fn list_engines(State(state): State<AppState>) -> Result<Json<Vec<Engine>>> {
    Ok(Json(state.service.engines().await?))
}

/// `GET /health/`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /table/{catalog.schema.table}/columns/`
pub async fn table_columns(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<EngineParams>,
) -> Result<Json<Vec<TableColumn>>> {
    let parts: Vec<&str> = table.split('.').collect();
    let [catalog, schema, name] = parts.as_slice() else {
        return Err(DjqError::validation(format!(
            "Table '{table}' must be of the form catalog.schema.table"
        )));
    };
    if [catalog, schema, name].iter().any(|part| part.is_empty()) {
        return Err(DjqError::validation(format!(
            "Table '{table}' must be of the form catalog.schema.table"
        )));
    }

    let columns = state
        .service
        .table_columns(
            params.engine_name,
            params.engine_version,
            catalog,
            schema,
            name,
        )
        .await?;
    Ok(Json(columns))
}

async fn translate(state: &AppState, params: &DjsqlParams) -> Result<TranslatedSql> {
    state
        .translator
        .translate(
            &params.query,
            params.engine_name.as_deref(),
            params.engine_version.as_deref(),
        )
        .await
}

fn query_create(translated: &TranslatedSql, async_: bool) -> QueryCreate {
    QueryCreate::new(&translated.sql)
        .with_engine(&translated.engine_name, &translated.engine_version)
        .with_catalog(&translated.catalog_name)
        .asynchronous(async_)
}

/// Replaces the first statement's columns with those known from translation.
fn inject_columns(result: &mut QueryWithResults, columns: Option<&[ColumnMetadata]>) {
    if let (Some(columns), Some(first)) = (columns, result.results.root.first_mut()) {
        first.columns = columns.to_vec();
    }
}

enum StreamStep {
    Start(QueryWithResults),
    Poll { id: Uuid, last: QueryState },
    Done,
}

/// Emits the submitted query, then one event per observed state change,
/// ending after the terminal state.
fn query_events(
    service: QueryService,
    initial: QueryWithResults,
    columns: Option<Vec<ColumnMetadata>>,
    interval: Duration,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream::unfold(StreamStep::Start(initial), move |step| {
        let service = service.clone();
        let columns = columns.clone();
        async move {
            match step {
                StreamStep::Start(mut query) => {
                    let next = next_step(&query);
                    inject_columns(&mut query, columns.as_deref());
                    Some((Ok(query_event(&query)), next))
                }
                StreamStep::Poll { id, last } => loop {
                    tokio::time::sleep(interval).await;
                    match service.get(id).await {
                        Ok(Some(mut query)) => {
                            if query.state() == last {
                                continue;
                            }
                            debug!(%id, state = %query.state(), "Streaming state change");
                            let next = next_step(&query);
                            inject_columns(&mut query, columns.as_deref());
                            return Some((Ok(query_event(&query)), next));
                        }
                        Ok(None) => {
                            let err = DjqError::internal(format!("Query {id} disappeared"));
                            return Some((Ok(error_event(&err)), StreamStep::Done));
                        }
                        Err(e) => return Some((Ok(error_event(&e)), StreamStep::Done)),
                    }
                },
                StreamStep::Done => None,
            }
        }
    })
}

fn next_step(query: &QueryWithResults) -> StreamStep {
    if query.state().is_terminal() {
        StreamStep::Done
    } else {
        StreamStep::Poll {
            id: query.query.id,
            last: query.state(),
        }
    }
}

fn query_event(query: &QueryWithResults) -> Event {
    let event = Event::default()
        .event("message")
        .id(Uuid::new_v4().to_string());
    match event.json_data(query) {
        Ok(event) => event,
        Err(e) => error_event(&DjqError::internal(format!(
            "Failed to serialize query event: {e}"
        ))),
    }
}

fn error_event(err: &DjqError) -> Event {
    Event::default().event("error").data(err.to_string())
}
