//! Query records and the lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Results;
use crate::error::{DjqError, Result};

/// Lifecycle state of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    #[default]
    Unknown,
    Accepted,
    Scheduled,
    Running,
    Finished,
    Canceled,
    Failed,
}

impl QueryState {
    /// Every state, in lifecycle order.
    pub const ALL: [QueryState; 7] = [
        Self::Unknown,
        Self::Accepted,
        Self::Scheduled,
        Self::Running,
        Self::Finished,
        Self::Canceled,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Accepted => "ACCEPTED",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        }
    }

    /// Returns true for states from which no further transition occurs.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Canceled | Self::Failed)
    }

    /// Position in the lifecycle. All terminal states share the last rank.
    fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Accepted => 1,
            Self::Scheduled => 2,
            Self::Running => 3,
            Self::Finished | Self::Canceled | Self::Failed => 4,
        }
    }

    /// Returns true if moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(&self, next: QueryState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl FromStr for QueryState {
    type Err = DjqError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| {
                DjqError::protocol(format!("Query state {s} is not a known query state"))
            })
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted query and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub catalog_name: String,
    pub engine_name: String,
    pub engine_version: String,
    pub submitted_query: String,
    /// The text actually run, after any engine-specific rewrite.
    pub executed_query: Option<String>,
    pub scheduled: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub state: QueryState,
    pub progress: f64,
}

impl Query {
    /// Creates an accepted query with a fresh identifier.
    pub fn new(
        catalog_name: impl Into<String>,
        engine_name: impl Into<String>,
        engine_version: impl Into<String>,
        submitted_query: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            catalog_name: catalog_name.into(),
            engine_name: engine_name.into(),
            engine_version: engine_version.into(),
            submitted_query: submitted_query.into(),
            executed_query: None,
            scheduled: None,
            started: None,
            finished: None,
            state: QueryState::Accepted,
            progress: 0.0,
        }
    }

    /// Moves the query to `next`, rejecting transitions that would revert.
    pub fn advance(&mut self, next: QueryState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(DjqError::internal(format!(
                "Illegal query state transition {} -> {} for query {}",
                self.state, next, self.id
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// Request body for a query submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryCreate {
    #[serde(default)]
    pub catalog_name: Option<String>,
    #[serde(default)]
    pub engine_name: Option<String>,
    #[serde(default)]
    pub engine_version: Option<String>,
    pub submitted_query: String,
    #[serde(default)]
    pub async_: bool,
}

impl QueryCreate {
    pub fn new(submitted_query: impl Into<String>) -> Self {
        Self {
            submitted_query: submitted_query.into(),
            ..Self::default()
        }
    }

    pub fn with_engine(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.engine_name = Some(name.into());
        self.engine_version = Some(version.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog_name = Some(catalog.into());
        self
    }

    pub fn asynchronous(mut self, async_: bool) -> Self {
        self.async_ = async_;
        self
    }
}

/// A query record together with its results and errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryWithResults {
    #[serde(flatten)]
    pub query: Query,
    #[serde(default)]
    pub results: Results,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl QueryWithResults {
    pub fn new(query: Query, results: Results, errors: Vec<String>) -> Self {
        Self {
            query,
            results,
            errors,
            links: Vec::new(),
        }
    }

    pub fn state(&self) -> QueryState {
        self.query.state
    }
}
