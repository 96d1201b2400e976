//! Job status requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::{DjqError, Result};

/// A data request against a node or a set of metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRequest {
    pub node: Option<String>,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub filters: Vec<String>,
    pub engine_name: Option<String>,
    pub engine_version: Option<String>,
}

impl DataRequest {
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            node: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn metrics<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_dimensions(mut self, dimensions: Vec<String>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_engine(mut self, name: Option<String>, version: Option<String>) -> Self {
        self.engine_name = name;
        self.engine_version = version;
        self
    }

    /// Checks that exactly one of a node or a metric set is targeted.
    pub fn validate(&self) -> Result<()> {
        match (&self.node, self.metrics.is_empty()) {
            (Some(_), true) | (None, false) => Ok(()),
            (Some(_), false) => Err(DjqError::validation(
                "Specify either a node or a set of metrics, not both",
            )),
            (None, true) => Err(DjqError::validation(
                "Specify either a node or a set of metrics",
            )),
        }
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs: Vec<(&'static str, String)> = Vec::new();
        pairs.extend(self.metrics.iter().map(|m| ("metrics", m.clone())));
        pairs.extend(self.dimensions.iter().map(|d| ("dimensions", d.clone())));
        pairs.extend(self.filters.iter().map(|f| ("filters", f.clone())));
        if let Some(name) = &self.engine_name {
            pairs.push(("engine_name", name.clone()));
        }
        if let Some(version) = &self.engine_version {
            pairs.push(("engine_version", version.clone()));
        }
        pairs.push(("async_", "true".to_string()));
        pairs
    }
}

/// The job a poller follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    /// `GET /data/...`, resubmitted on every poll; the server deduplicates.
    Data(DataRequest),
    /// `GET /queries/{id}` on a query service.
    Query(Uuid),
}

impl JobTarget {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Data(request) => request.validate(),
            Self::Query(_) => Ok(()),
        }
    }
}

/// Status code and body of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// Issues status requests for a job.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn fetch(&self, target: &JobTarget) -> Result<RawResponse>;
}

/// Status requests over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Creates a transport rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DjqError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base(base_url)?,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolves `path` against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| DjqError::config(format!("Invalid request path '{path}': {e}")))
    }

    /// Sends a request and reads the status and body, whatever the status.
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<RawResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| DjqError::unexpected(format!("Request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DjqError::unexpected(format!("Failed to read response body: {e}")))?;
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl JobTransport for HttpTransport {
    async fn fetch(&self, target: &JobTarget) -> Result<RawResponse> {
        let request = match target {
            JobTarget::Data(data) => {
                let path = match &data.node {
                    Some(node) => format!("data/{node}/"),
                    None => "data/".to_string(),
                };
                self.client
                    .get(self.url(&path)?)
                    .query(&data.query_pairs())
            }
            JobTarget::Query(id) => self.client.get(self.url(&format!("queries/{id}"))?),
        };
        let response = self.send(request).await?;
        debug!(status = response.status, "Polled job status");
        Ok(response)
    }
}

/// Parses the base URL, making sure relative joins stay under its path.
fn normalize_base(base_url: &str) -> Result<Url> {
    let with_slash = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| DjqError::config(format!("Invalid base URL '{base_url}': {e}")))
}
