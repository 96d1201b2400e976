//! Asynchronous job poller.
//!
//! Polls a job until it reaches a terminal state, waiting between polls with
//! exponential backoff, and converts the final results into a [`Table`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::table::Table;
use super::transport::{JobTarget, JobTransport};
use crate::config::PollerConfig;
use crate::db::ColumnMetadata;
use crate::error::{DjqError, Result};
use crate::query::QueryState;

/// Source of delays between polls.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time, via the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Wait schedule between polls: starts at `initial` and doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    /// Ceiling on the wait. `None` doubles without bound.
    pub max: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: None,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_interval_ms),
            max: config.max_interval_ms.map(Duration::from_millis),
        }
    }

    fn cap(&self, wait: Duration) -> Duration {
        match self.max {
            Some(max) => wait.min(max),
            None => wait,
        }
    }

    pub fn first(&self) -> Duration {
        self.cap(self.initial)
    }

    pub fn next(&self, current: Duration) -> Duration {
        self.cap(current.saturating_mul(2))
    }
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    state: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    results: Option<ResultsPayload>,
}

/// Results arrive as a bare list, `{"root": [...]}` or `{"results": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResultsPayload {
    List(Vec<StatementPayload>),
    Root { root: Vec<StatementPayload> },
    Nested { results: Vec<StatementPayload> },
}

impl ResultsPayload {
    fn into_statements(self) -> Vec<StatementPayload> {
        match self {
            Self::List(statements)
            | Self::Root { root: statements }
            | Self::Nested {
                results: statements,
            } => statements,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatementPayload {
    #[serde(default)]
    columns: Vec<ColumnMetadata>,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

/// One parsed poll response.
#[derive(Debug)]
struct JobStatus {
    state: QueryState,
    links: Vec<String>,
    results: Option<ResultsPayload>,
}

impl JobStatus {
    fn parse(body: &str) -> Result<Self> {
        let payload: StatusPayload = serde_json::from_str(body)
            .map_err(|e| DjqError::protocol(format!("Malformed job status: {e}")))?;
        let state: QueryState = payload
            .state
            .ok_or_else(|| DjqError::protocol("Job status has no state"))?
            .parse()?;
        Ok(Self {
            state,
            links: payload.links,
            results: payload.results,
        })
    }

    fn into_table(self) -> Table {
        self.results
            .map(ResultsPayload::into_statements)
            .and_then(|statements| statements.into_iter().next())
            .map(|first| Table::new(first.columns, first.rows))
            .unwrap_or_default()
    }
}

/// Drives a job to a terminal state.
#[derive(Clone)]
pub struct JobPoller {
    transport: Arc<dyn JobTransport>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
}

impl JobPoller {
    pub fn new(transport: Arc<dyn JobTransport>) -> Self {
        Self {
            transport,
            clock: Arc::new(TokioClock),
            backoff: BackoffPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stops the poll loop when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Polls `target` until it is terminal.
    ///
    /// `on_links` is called once, with the first non-empty set of links.
    /// Requests that target both or neither of a node and a metric set fail
    /// before any request is made.
    pub async fn poll<F>(&self, target: &JobTarget, mut on_links: F) -> Result<Table>
    where
        F: FnMut(&[String]) + Send,
    {
        target.validate()?;

        let mut wait = self.backoff.first();
        let mut links_shown = false;

        loop {
            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(canceled_by_caller()),
                response = self.transport.fetch(target) => response?,
            };
            if response.is_failure() {
                return Err(DjqError::Http {
                    status: response.status,
                    body: response.body,
                });
            }

            let status = JobStatus::parse(&response.body)?;
            if !links_shown && !status.links.is_empty() {
                on_links(&status.links);
                links_shown = true;
            }

            let state = status.state;
            if state.is_terminal() {
                info!(%state, "Job reached a terminal state");
                return match state {
                    QueryState::Finished => Ok(status.into_table()),
                    QueryState::Canceled => Err(DjqError::canceled("Job was canceled")),
                    _ => Err(DjqError::JobFailed(response.body)),
                };
            }

            debug!(%state, wait_ms = wait.as_millis() as u64, "Job still running");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(canceled_by_caller()),
                _ = self.clock.sleep(wait) => {}
            }
            wait = self.backoff.next(wait);
        }
    }
}

fn canceled_by_caller() -> DjqError {
    DjqError::canceled("Polling stopped by caller")
}
