//! HTTP surface tests, driven through the router without a socket.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use dj_query::config::ExecutionConfig;
use dj_query::db::{ColumnMetadata, ColumnType};
use dj_query::error::Result;
use dj_query::server::{self, SqlTranslator, TranslatedSql};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::{app_state, execution_with_default, sqlite_router, sqlite_service};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

async fn post_json(
    router: &Router,
    uri: &str,
    body: Value,
    connection_uri: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(connection_uri) = connection_uri {
        builder = builder.header("x-connection-uri", connection_uri);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

/// Reports fixed columns for every query, like a translator that knows the
/// semantic types of the requested metrics.
struct FixedColumnsTranslator;

#[async_trait]
impl SqlTranslator for FixedColumnsTranslator {
    async fn translate(
        &self,
        query: &str,
        _engine_name: Option<&str>,
        _engine_version: Option<&str>,
    ) -> Result<TranslatedSql> {
        Ok(TranslatedSql {
            sql: query.to_string(),
            columns: Some(vec![ColumnMetadata::new(
                "default.revenue",
                ColumnType::Float,
            )]),
            engine_name: "lite".to_string(),
            engine_version: "3".to_string(),
            catalog_name: "default".to_string(),
        })
    }
}

#[tokio::test]
async fn test_health() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = get_json(&router, "/health/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_djsql_data_runs_synchronously_on_default_engine() {
    let (_db, router) = sqlite_router(execution_with_default()).await;
    let (status, body) = get_json(&router, "/djsql/data?query=SELECT%201%20AS%20one").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "FINISHED");
    assert_eq!(body["engine_name"], "lite");
    assert_eq!(body["results"]["root"][0]["rows"], json!([[1]]));
    assert_eq!(body["results"]["root"][0]["columns"][0]["name"], "one");
}

#[tokio::test]
async fn test_djsql_data_async_returns_scheduled_record() {
    let (_db, router) = sqlite_router(execution_with_default()).await;
    let (status, body) = get_json(&router, "/djsql/data?query=SELECT%201&async_=true").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "SCHEDULED");
    assert_eq!(body["results"]["root"], json!([]));
}

#[tokio::test]
async fn test_djsql_data_without_engine_is_rejected() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = get_json(&router, "/djsql/data?query=SELECT%201").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["category"], "Validation Error");
}

#[tokio::test]
async fn test_translator_columns_replace_driver_columns() {
    let (_db, service) = sqlite_service(ExecutionConfig::default()).await;
    let state = app_state(service).with_translator(Arc::new(FixedColumnsTranslator));
    let router = server::router(state);

    let (status, body) = get_json(&router, "/djsql/data?query=SELECT%2010%20AS%20x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["results"]["root"][0]["columns"],
        json!([{ "name": "default.revenue", "type": "float" }])
    );
    assert_eq!(body["results"]["root"][0]["rows"], json!([[10]]));
}

#[tokio::test]
async fn test_translator_columns_skip_failed_queries() {
    let (_db, service) = sqlite_service(ExecutionConfig::default()).await;
    let state = app_state(service).with_translator(Arc::new(FixedColumnsTranslator));
    let router = server::router(state);

    let (status, body) =
        get_json(&router, "/djsql/data?query=SELECT%20*%20FROM%20nowhere").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "FAILED");
    assert_eq!(body["results"]["root"], json!([]));
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_query_with_connection_override() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = post_json(
        &router,
        "/queries/",
        json!({
            "engine_name": "lite",
            "engine_version": "3",
            "submitted_query": "SELECT 5 AS five",
        }),
        Some("sqlite::memory:"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "FINISHED");
    assert_eq!(body["results"]["root"][0]["rows"], json!([[5]]));

    let id = body["id"].as_str().unwrap();
    let (status, fetched) = get_json(&router, &format!("/queries/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["state"], "FINISHED");
    assert_eq!(fetched["results"], body["results"]);
}

#[tokio::test]
async fn test_submit_query_with_half_engine_selector_is_rejected() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = post_json(
        &router,
        "/queries/",
        json!({ "engine_name": "lite", "submitted_query": "SELECT 1" }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["category"], "Validation Error");
}

#[tokio::test]
async fn test_unknown_query_is_not_found() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = get_json(
        &router,
        "/queries/00000000-0000-4000-8000-000000000000",
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["category"], "Not Found");
}

#[tokio::test]
async fn test_list_engines() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = get_json(&router, "/engines/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "lite");
    assert_eq!(body[0]["version"], "3");
    assert_eq!(body[0]["uri"], "sqlite::memory:");
}

#[tokio::test]
async fn test_table_columns_rejects_malformed_table_path() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = get_json(&router, "/table/orders.only/columns/").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("catalog.schema.table"));
}

#[tokio::test]
async fn test_table_columns_requires_warehouse_engine() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, _) = get_json(
        &router,
        "/table/default.main.orders/columns/?engine_name=lite&engine_version=3",
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_stream_emits_states_until_terminal() {
    let (_db, router) = sqlite_router(execution_with_default()).await;
    let request = Request::builder()
        .uri("/djsql/stream/?query=SELECT%201%20AS%20one")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);

    let events: Vec<Value> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect();

    assert!(!events.is_empty());
    assert!(body.contains("event: message"));
    let last = events.last().unwrap();
    assert_eq!(last["state"], "FINISHED");
    assert_eq!(last["results"]["root"][0]["rows"], json!([[1]]));

    let states: Vec<&str> = events.iter().map(|e| e["state"].as_str().unwrap()).collect();
    let mut deduped = states.clone();
    deduped.dedup();
    assert_eq!(states, deduped, "each event carries a new state");
}

#[tokio::test]
async fn test_stream_rejects_missing_engine_up_front() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let (status, body) = get_json(&router, "/djsql/stream/?query=SELECT%201").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["category"], "Validation Error");
}
