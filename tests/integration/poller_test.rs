//! Client polling against live HTTP servers on ephemeral ports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use dj_query::client::{BackoffPolicy, DataRequest, DjClient, HttpTransport};
use dj_query::config::ExecutionConfig;
use dj_query::error::DjqError;
use dj_query::query::{QueryCreate, QueryState};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{execution_with_default, spawn_router, sqlite_router};

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(5),
        max: Some(Duration::from_millis(20)),
    }
}

fn client(base_url: &str) -> DjClient {
    let transport = HttpTransport::new(base_url, Duration::from_secs(5)).unwrap();
    DjClient::new(transport, fast_backoff())
}

/// A data server that walks through a fixed sequence of job payloads,
/// repeating the last one once the script runs out.
#[derive(Clone)]
struct ScriptedServer {
    script: Arc<Vec<Value>>,
    calls: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    fn new(script: Vec<Value>) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/data/", get(scripted_data))
            .route("/data/{node}/", get(scripted_data))
            .with_state(self.clone())
    }
}

async fn scripted_data(
    State(server): State<ScriptedServer>,
    RawQuery(query): RawQuery,
) -> Json<Value> {
    server
        .queries
        .lock()
        .unwrap()
        .push(query.unwrap_or_default());
    let call = server.calls.fetch_add(1, Ordering::SeqCst);
    let step = call.min(server.script.len() - 1);
    Json(server.script[step].clone())
}

#[tokio::test]
async fn test_metrics_request_polls_until_finished() {
    let server = ScriptedServer::new(vec![
        json!({ "state": "SCHEDULED", "links": [] }),
        json!({ "state": "RUNNING", "links": ["http://ui/job/1"] }),
        json!({ "state": "RUNNING", "links": ["http://ui/job/1"] }),
        json!({
            "state": "FINISHED",
            "links": ["http://ui/job/1"],
            "results": [{
                "sql": "SELECT ...",
                "columns": [
                    { "name": "default.date", "type": "string" },
                    { "name": "default.revenue", "type": "float" }
                ],
                "rows": [["2024-01-01", 10.5], ["2024-01-02", 7]]
            }]
        }),
    ]);
    let base = spawn_router(server.router()).await;

    let mut seen_links = Vec::new();
    let request = DataRequest::metrics(["default.revenue"]).with_dimensions(vec!["default.date".to_string()]);
    let table = client(&base)
        .fetch_data(request, CancellationToken::new(), |links| {
            seen_links.push(links.to_vec())
        })
        .await
        .unwrap();

    assert_eq!(server.calls.load(Ordering::SeqCst), 4);
    assert_eq!(seen_links, vec![vec!["http://ui/job/1".to_string()]]);
    assert_eq!(table.column_names(), vec!["default.date", "default.revenue"]);
    assert_eq!(table.len(), 2);
    assert_eq!(table.records()[0]["default.revenue"], json!(10.5));

    let queries = server.queries.lock().unwrap();
    assert!(queries[0].contains("metrics=default.revenue"));
    assert!(queries[0].contains("dimensions=default.date"));
    assert!(queries[0].contains("async_=true"));
}

#[tokio::test]
async fn test_node_request_uses_node_path() {
    let server = ScriptedServer::new(vec![json!({
        "state": "FINISHED",
        "results": [{ "columns": [{ "name": "id", "type": "float" }], "rows": [[1], [2]] }]
    })]);
    let base = spawn_router(server.router()).await;

    let table = client(&base)
        .node_data("default.orders", Vec::new(), vec!["id > 0".to_string()])
        .await
        .unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_job_surfaces_body() {
    let server = ScriptedServer::new(vec![json!({
        "state": "FAILED",
        "errors": ["division by zero"]
    })]);
    let base = spawn_router(server.router()).await;

    let err = client(&base)
        .data(vec!["default.revenue".to_string()], Vec::new(), Vec::new())
        .await
        .unwrap_err();

    let DjqError::JobFailed(body) = err else {
        panic!("expected a job failure, got {err:?}");
    };
    assert!(body.contains("division by zero"));
}

#[tokio::test]
async fn test_canceled_job_is_reported() {
    let server = ScriptedServer::new(vec![json!({ "state": "CANCELED" })]);
    let base = spawn_router(server.router()).await;

    let err = client(&base)
        .data(vec!["default.revenue".to_string()], Vec::new(), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DjqError::Canceled(_)));
}

#[tokio::test]
async fn test_http_failure_stops_polling() {
    let router = Router::new().route(
        "/data/",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = spawn_router(router).await;

    let err = client(&base)
        .data(vec!["default.revenue".to_string()], Vec::new(), Vec::new())
        .await
        .unwrap_err();

    match err {
        DjqError::Http { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected an HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_interrupts_a_long_wait() {
    let server = ScriptedServer::new(vec![json!({ "state": "RUNNING" })]);
    let base = spawn_router(server.router()).await;
    let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();
    let slow = DjClient::new(
        transport,
        BackoffPolicy {
            initial: Duration::from_secs(60),
            max: None,
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        slow.fetch_data(DataRequest::metrics(["default.revenue"]), cancel, |_| {}),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, DjqError::Canceled(_)));
    assert_eq!(server.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_waits_for_async_query_on_the_service() {
    let (_db, router) = sqlite_router(execution_with_default()).await;
    let base = spawn_router(router).await;
    let client = client(&base);

    let submitted = client
        .submit_query(
            &QueryCreate::new("SELECT 1 AS one, 'a' AS letter").asynchronous(true),
            None,
        )
        .await
        .unwrap();
    assert_eq!(submitted.state(), QueryState::Scheduled);

    let table = client
        .wait_for_query(submitted.query.id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(table.column_names(), vec!["one", "letter"]);
    assert_eq!(table.rows(), &[vec![json!(1), json!("a")]]);

    let fetched = client.get_query(submitted.query.id).await.unwrap();
    assert_eq!(fetched.state(), QueryState::Finished);
}

#[tokio::test]
async fn test_rejected_submission_is_http_error() {
    let (_db, router) = sqlite_router(ExecutionConfig::default()).await;
    let base = spawn_router(router).await;

    let err = client(&base)
        .submit_query(&QueryCreate::new("SELECT 1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DjqError::Http { status: 422, .. }));
}
