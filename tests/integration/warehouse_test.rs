//! Warehouse adapter tests against a fake statements API.

use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dj_query::db::type_mapping::WarehouseType;
use dj_query::db::{
    Adapter, ExecutionContext, TableColumn, Value, WarehouseAdapter, WarehouseSettings,
};
use dj_query::engine::{Engine, EngineType};
use dj_query::error::DjqError;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use super::spawn_router;

const TOKEN: &str = "test-token";

async fn submit(headers: HeaderMap, Json(body): Json<JsonValue>) -> Response {
    let expected = format!("Bearer {TOKEN}");
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let statement = body["statement"].as_str().unwrap_or_default();
    if statement.contains("INFORMATION_SCHEMA") {
        return information_schema(&body);
    }
    match statement {
        "SELECT slow" => (
            StatusCode::ACCEPTED,
            Json(json!({ "statementHandle": "h-slow" })),
        )
            .into_response(),
        "SELECT * FROM gone" => missing_object("DB.PUBLIC.GONE"),
        _ => Json(json!({
            "statementHandle": "h-fast",
            "resultSetMetaData": {
                "rowType": [{ "type": "fixed", "scale": 0 }, { "type": "text" }],
                "partitionInfo": [{ "rowCount": 1 }]
            },
            "data": [["1", "one"]]
        }))
        .into_response(),
    }
}

fn information_schema(body: &JsonValue) -> Response {
    match body["bindings"]["2"]["value"].as_str() {
        Some("orders") => Json(json!({
            "resultSetMetaData": {
                "rowType": [
                    { "type": "text" }, { "type": "text" },
                    { "type": "fixed", "scale": 0 }, { "type": "fixed", "scale": 0 }
                ],
                "partitionInfo": [{ "rowCount": 3 }]
            },
            "data": [
                ["ID", "NUMBER", "38", "0"],
                ["AMOUNT", "NUMBER", "10", "2"],
                ["NAME", "TEXT", null, null]
            ]
        }))
        .into_response(),
        Some("gone") => missing_object("DB.PUBLIC.GONE"),
        _ => Json(json!({
            "resultSetMetaData": { "rowType": [], "partitionInfo": [] },
            "data": []
        }))
        .into_response(),
    }
}

fn missing_object(object: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "code": "002003",
            "message": format!(
                "SQL compilation error:\nObject '{object}' does not exist or not authorized."
            )
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct PartitionParams {
    partition: Option<usize>,
}

/// The slow statement completes on its first status poll with two partitions.
async fn status(Path(handle): Path<String>, Query(params): Query<PartitionParams>) -> Response {
    if handle != "h-slow" {
        return StatusCode::NOT_FOUND.into_response();
    }
    match params.partition {
        None | Some(0) => Json(json!({
            "statementHandle": "h-slow",
            "resultSetMetaData": {
                "rowType": [{ "type": "fixed", "scale": 0 }, { "type": "boolean" }],
                "partitionInfo": [{ "rowCount": 1 }, { "rowCount": 1 }]
            },
            "data": [["1", "true"]]
        }))
        .into_response(),
        Some(1) => Json(json!({ "data": [["2", "false"]] })).into_response(),
        Some(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn warehouse_engine() -> Engine {
    let router = Router::new()
        .route("/api/v2/statements", post(submit))
        .route("/api/v2/statements/{handle}", get(status));
    let base = spawn_router(router).await;
    Engine::new(
        "snow",
        "1",
        EngineType::Snowflake,
        "snowflake://acct/DB/PUBLIC?warehouse=WH",
    )
    .with_param("host", base)
}

fn settings() -> WarehouseSettings {
    WarehouseSettings {
        token: Some(TOKEN.to_string()),
        poll_interval: Duration::from_millis(1),
        ..WarehouseSettings::default()
    }
}

fn context() -> ExecutionContext {
    ExecutionContext {
        warehouse: settings(),
        query_timeout: Duration::from_secs(10),
        ..ExecutionContext::default()
    }
}

#[tokio::test]
async fn test_single_partition_statement() {
    let engine = warehouse_engine().await;
    let adapter = Adapter::select(&engine, None);
    assert_eq!(adapter.kind(), "warehouse");

    let outputs = adapter.run("SELECT 1, 'one'", &context()).await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].sql, "SELECT 1, 'one'");
    assert!(outputs[0].columns.is_empty());
    assert_eq!(
        outputs[0].rows,
        vec![vec![Value::Int(1), Value::String("one".to_string())]]
    );
}

#[tokio::test]
async fn test_running_statement_is_polled_and_partitions_fetched_in_order() {
    let engine = warehouse_engine().await;
    let outputs = Adapter::select(&engine, None)
        .run("SELECT slow", &context())
        .await
        .unwrap();

    assert_eq!(
        outputs[0].rows,
        vec![
            vec![Value::Int(1), Value::Bool(true)],
            vec![Value::Int(2), Value::Bool(false)],
        ]
    );
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let engine = warehouse_engine().await;
    let err = Adapter::select(&engine, None)
        .run("SELECT * FROM gone", &context().with_catalog("warehouse"))
        .await
        .unwrap_err();

    match err {
        DjqError::NotFound { object, catalog } => {
            assert_eq!(object, "DB.PUBLIC.GONE");
            assert_eq!(catalog, "warehouse");
        }
        other => panic!("expected not found, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_credential_is_config_error() {
    let engine = warehouse_engine().await;
    let ctx = ExecutionContext {
        warehouse: WarehouseSettings::default(),
        ..context()
    };
    let err = Adapter::select(&engine, None)
        .run("SELECT 1", &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, DjqError::Config(_)));
}

#[tokio::test]
async fn test_rejected_credential_is_backend_error() {
    let engine = warehouse_engine().await;
    let ctx = ExecutionContext {
        warehouse: WarehouseSettings {
            token: Some("wrong".to_string()),
            ..settings()
        },
        ..context()
    };
    let err = Adapter::select(&engine, None)
        .run("SELECT 1", &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, DjqError::Backend { .. }));
    assert!(err.to_string().contains("Authentication failed"));
}

#[tokio::test]
async fn test_table_columns_use_fine_types() {
    let engine = warehouse_engine().await;
    let columns = WarehouseAdapter::new(engine)
        .table_columns("default", "PUBLIC", "orders", &settings(), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(
        columns,
        vec![
            TableColumn {
                name: "ID".to_string(),
                column_type: WarehouseType::Decimal {
                    precision: 38,
                    scale: 0
                },
            },
            TableColumn {
                name: "AMOUNT".to_string(),
                column_type: WarehouseType::Decimal {
                    precision: 10,
                    scale: 2
                },
            },
            TableColumn {
                name: "NAME".to_string(),
                column_type: WarehouseType::String,
            },
        ]
    );
    assert_eq!(
        serde_json::to_value(&columns[1]).unwrap(),
        json!({ "name": "AMOUNT", "type": "decimal(10,2)" })
    );
}

#[tokio::test]
async fn test_table_without_columns_is_not_found() {
    let engine = warehouse_engine().await;
    let err = WarehouseAdapter::new(engine)
        .table_columns("default", "PUBLIC", "empty", &settings(), Duration::from_secs(10))
        .await
        .unwrap_err();

    match err {
        DjqError::NotFound { object, catalog } => {
            assert_eq!(object, "DB.PUBLIC.empty");
            assert_eq!(catalog, "default");
        }
        other => panic!("expected not found, got {other:?}"),
    }
}

#[tokio::test]
async fn test_table_missing_in_warehouse_is_not_found() {
    let engine = warehouse_engine().await;
    let err = WarehouseAdapter::new(engine)
        .table_columns("default", "PUBLIC", "gone", &settings(), Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, DjqError::NotFound { .. }));
}
