//! Query lifecycle: records, execution and the submission service.
//!
//! The executor owns every state transition after submission. The service
//! decides between inline and background execution.

pub mod executor;
pub mod model;
pub mod service;

pub use executor::{ExecutionOutcome, QueryExecutor};
pub use model::{Query, QueryCreate, QueryState, QueryWithResults};
pub use service::QueryService;
