//! Shared fixtures for the integration tests.

pub mod executor_test;
pub mod poller_test;
pub mod postgres_test;
pub mod server_test;
pub mod warehouse_test;

use std::sync::Arc;

use axum::Router;
use dj_query::config::{Config, ExecutionConfig};
use dj_query::db::WarehouseSettings;
use dj_query::engine::{Engine, EngineType};
use dj_query::persistence::{SqliteResults, StateDb};
use dj_query::query::QueryService;
use dj_query::server::{self, AppState};

/// An engine that runs against a private in-memory SQLite database.
pub fn sqlite_engine() -> Engine {
    Engine::new("lite", "3", EngineType::Sqlalchemy, "sqlite::memory:")
}

/// Execution settings whose default engine is [`sqlite_engine`].
pub fn execution_with_default() -> ExecutionConfig {
    ExecutionConfig {
        default_engine_name: Some("lite".to_string()),
        default_engine_version: Some("3".to_string()),
        ..ExecutionConfig::default()
    }
}

/// A service over an in-memory state database with [`sqlite_engine`] registered.
///
/// The returned `StateDb` must outlive the service.
pub async fn sqlite_service(execution: ExecutionConfig) -> (StateDb, QueryService) {
    let db = StateDb::open_in_memory().await.unwrap();
    let results = Arc::new(SqliteResults::new(db.pool().clone()));
    let service = QueryService::new(
        db.pool().clone(),
        results,
        execution,
        WarehouseSettings::default(),
    );
    service.register_engine(&sqlite_engine()).await.unwrap();
    (db, service)
}

/// App state with a fast stream interval.
pub fn app_state(service: QueryService) -> AppState {
    let mut config = Config::default();
    config.poller.stream_interval_ms = 10;
    AppState::new(service, &config)
}

/// The full query service router over [`sqlite_service`].
pub async fn sqlite_router(execution: ExecutionConfig) -> (StateDb, Router) {
    let (db, service) = sqlite_service(execution).await;
    (db, server::router(app_state(service)))
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_router(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
