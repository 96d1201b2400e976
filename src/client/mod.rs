//! Client for a remote query server.
//!
//! Submits work, polls it to completion and returns tabular results.

mod poller;
mod table;
mod transport;

pub use poller::{BackoffPolicy, Clock, JobPoller, TokioClock};
pub use table::Table;
pub use transport::{DataRequest, HttpTransport, JobTarget, JobTransport, RawResponse};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{DjqError, Result};
use crate::query::{QueryCreate, QueryWithResults};

/// HTTP client for the data and query endpoints.
#[derive(Debug, Clone)]
pub struct DjClient {
    transport: Arc<HttpTransport>,
    backoff: BackoffPolicy,
    engine_name: Option<String>,
    engine_version: Option<String>,
}

impl DjClient {
    pub fn new(transport: HttpTransport, backoff: BackoffPolicy) -> Self {
        Self {
            transport: Arc::new(transport),
            backoff,
            engine_name: None,
            engine_version: None,
        }
    }

    /// Builds a client from the `[client]` and `[poller]` sections.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport =
            HttpTransport::new(&config.client.base_url, config.client.request_timeout())?;
        let mut client = Self::new(transport, BackoffPolicy::from_config(&config.poller));
        client.engine_name = config.client.engine_name.clone();
        client.engine_version = config.client.engine_version.clone();
        Ok(client)
    }

    /// A poller over this client's transport, stopped by `cancel`.
    pub fn poller(&self, cancel: CancellationToken) -> JobPoller {
        let transport: Arc<dyn JobTransport> = self.transport.clone();
        JobPoller::new(transport)
            .with_backoff(self.backoff)
            .with_cancellation(cancel)
    }

    /// Fetches data for a set of metrics.
    pub async fn data(
        &self,
        metrics: Vec<String>,
        dimensions: Vec<String>,
        filters: Vec<String>,
    ) -> Result<Table> {
        let request = DataRequest::metrics(metrics)
            .with_dimensions(dimensions)
            .with_filters(filters);
        self.fetch_data(request, CancellationToken::new(), log_links)
            .await
    }

    /// Fetches data for a single node.
    pub async fn node_data(
        &self,
        node: &str,
        dimensions: Vec<String>,
        filters: Vec<String>,
    ) -> Result<Table> {
        let request = DataRequest::node(node)
            .with_dimensions(dimensions)
            .with_filters(filters);
        self.fetch_data(request, CancellationToken::new(), log_links)
            .await
    }

    /// Polls a data request to completion.
    ///
    /// The client's default engine fills in when the request names none.
    pub async fn fetch_data<F>(
        &self,
        mut request: DataRequest,
        cancel: CancellationToken,
        on_links: F,
    ) -> Result<Table>
    where
        F: FnMut(&[String]) + Send,
    {
        if request.engine_name.is_none() && request.engine_version.is_none() {
            request.engine_name = self.engine_name.clone();
            request.engine_version = self.engine_version.clone();
        }
        self.poller(cancel)
            .poll(&JobTarget::Data(request), on_links)
            .await
    }

    /// Submits a query to the query service.
    pub async fn submit_query(
        &self,
        create: &QueryCreate,
        connection_override: Option<&str>,
    ) -> Result<QueryWithResults> {
        let mut request = self
            .transport
            .client()
            .post(self.transport.url("queries/")?)
            .json(create);
        if let Some(uri) = connection_override {
            request = request.header("X-Connection-Uri", uri);
        }
        decode(self.transport.send(request).await?)
    }

    pub async fn get_query(&self, id: Uuid) -> Result<QueryWithResults> {
        let request = self
            .transport
            .client()
            .get(self.transport.url(&format!("queries/{id}"))?);
        decode(self.transport.send(request).await?)
    }

    /// Polls a submitted query until it is terminal.
    pub async fn wait_for_query(&self, id: Uuid, cancel: CancellationToken) -> Result<Table> {
        self.poller(cancel)
            .poll(&JobTarget::Query(id), |_| {})
            .await
    }
}

fn log_links(links: &[String]) {
    info!("See the following links for more information: {}", links.join(", "));
}

fn decode(response: RawResponse) -> Result<QueryWithResults> {
    if response.is_failure() {
        return Err(DjqError::Http {
            status: response.status,
            body: response.body,
        });
    }
    serde_json::from_str(&response.body)
        .map_err(|e| DjqError::protocol(format!("Malformed query response: {e}")))
}
