//! HTTP query surface.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/djsql/data` | Translate and run a query, sync or async |
//! | `GET` | `/djsql/stream/` | Run a query and stream its states as server-sent events |
//! | `POST` | `/queries/` | Submit a query |
//! | `GET` | `/queries/{id}` | Query record with results |
//! | `GET` | `/engines/` | Registered engines |
//! | `GET` | `/table/{table}/columns/` | Warehouse table columns |
//! | `GET` | `/health/` | Liveness |

mod error;
pub mod handlers;
pub mod translate;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::config::Config;
use crate::error::{DjqError, Result};
use crate::query::QueryService;

pub use translate::{PassthroughTranslator, SqlTranslator, TranslatedSql};

/// State shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: QueryService,
    pub translator: Arc<dyn SqlTranslator>,
    /// Interval between polls on the stream endpoint.
    pub stream_interval: Duration,
}

impl AppState {
    /// Builds state with the passthrough translator.
    pub fn new(service: QueryService, config: &Config) -> Self {
        Self {
            translator: Arc::new(PassthroughTranslator::new(service.execution().clone())),
            service,
            stream_interval: Duration::from_millis(config.poller.stream_interval_ms),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn SqlTranslator>) -> Self {
        self.translator = translator;
        self
    }
}

/// Creates the query service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/djsql/data", get(handlers::djsql_data))
        .route("/djsql/stream/", get(handlers::djsql_stream))
        .route("/queries/", post(handlers::submit_query))
        .route("/queries/{id}", get(handlers::get_query))
        .route("/engines/", get(handlers::list_engines))
        .route("/table/{table}/columns/", get(handlers::table_columns))
        .route("/health/", get(handlers::health))
        .with_state(state)
}

/// Serves the router on `bind` until interrupted.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| DjqError::config(format!("Failed to bind {bind}: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| DjqError::internal(format!("Failed to read local address: {e}")))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DjqError::internal(format!("Server error: {e}")))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
