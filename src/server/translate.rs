//! SQL translation collaborator.
//!
//! The HTTP surface accepts DJ SQL and hands it to a translator, which
//! returns executable SQL bound to an engine and catalog.

use async_trait::async_trait;

use crate::config::ExecutionConfig;
use crate::db::ColumnMetadata;
use crate::error::{DjqError, Result};

/// Executable SQL produced from a DJ SQL query.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedSql {
    pub sql: String,
    /// Columns known from translation. `None` leaves driver columns untouched.
    pub columns: Option<Vec<ColumnMetadata>>,
    pub engine_name: String,
    pub engine_version: String,
    pub catalog_name: String,
}

#[async_trait]
pub trait SqlTranslator: Send + Sync {
    async fn translate(
        &self,
        query: &str,
        engine_name: Option<&str>,
        engine_version: Option<&str>,
    ) -> Result<TranslatedSql>;
}

/// Treats the input as already translated.
///
/// Binds it to the requested engine, or the configured default, and reports
/// no columns.
#[derive(Debug, Clone)]
pub struct PassthroughTranslator {
    execution: ExecutionConfig,
}

impl PassthroughTranslator {
    pub fn new(execution: ExecutionConfig) -> Self {
        Self { execution }
    }
}

#[async_trait]
impl SqlTranslator for PassthroughTranslator {
    async fn translate(
        &self,
        query: &str,
        engine_name: Option<&str>,
        engine_version: Option<&str>,
    ) -> Result<TranslatedSql> {
        if query.trim().is_empty() {
            return Err(DjqError::validation("Query is empty"));
        }

        let (engine_name, engine_version) = match (engine_name, engine_version) {
            (Some(name), Some(version)) => (name, version),
            (None, None) => self.execution.default_engine().ok_or_else(|| {
                DjqError::validation("No engine specified and no default engine configured")
            })?,
            _ => {
                return Err(DjqError::validation(
                    "engine_name and engine_version must be given together",
                ))
            }
        };

        Ok(TranslatedSql {
            sql: query.to_string(),
            columns: None,
            engine_name: engine_name.to_string(),
            engine_version: engine_version.to_string(),
            catalog_name: self.execution.default_catalog.clone(),
        })
    }
}
