//! Command-line argument parsing for dj-query.

use crate::client::DataRequest;
use crate::config::Config;
use crate::query::QueryCreate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Query execution service and job polling client.
#[derive(Parser, Debug)]
#[command(name = "djq")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP query service
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Run one query locally and print the query record as JSON
    Query(QueryArgs),

    /// Fetch data from a remote server, polling until the job completes
    Data(DataArgs),
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct QueryArgs {
    /// SQL to run
    #[arg(value_name = "SQL")]
    pub sql: String,

    #[arg(long, value_name = "NAME")]
    pub engine_name: Option<String>,

    #[arg(long, value_name = "VERSION")]
    pub engine_version: Option<String>,

    #[arg(long, value_name = "CATALOG")]
    pub catalog: Option<String>,

    /// Connection string that replaces the engine's own
    #[arg(long, value_name = "URI")]
    pub connection_uri: Option<String>,

    /// Return as soon as the query is scheduled
    #[arg(long = "async")]
    pub async_: bool,
}

impl QueryArgs {
    pub fn to_query_create(&self) -> QueryCreate {
        QueryCreate {
            catalog_name: self.catalog.clone(),
            engine_name: self.engine_name.clone(),
            engine_version: self.engine_version.clone(),
            submitted_query: self.sql.clone(),
            async_: self.async_,
        }
    }
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct DataArgs {
    /// Node to fetch
    #[arg(long, value_name = "NAME")]
    pub node: Option<String>,

    /// Metric to fetch (repeatable)
    #[arg(long = "metric", value_name = "METRIC")]
    pub metrics: Vec<String>,

    /// Dimension to group by (repeatable)
    #[arg(long = "dimension", value_name = "DIMENSION")]
    pub dimensions: Vec<String>,

    /// Filter expression (repeatable)
    #[arg(long = "filter", value_name = "FILTER")]
    pub filters: Vec<String>,

    #[arg(long, value_name = "NAME")]
    pub engine_name: Option<String>,

    #[arg(long, value_name = "VERSION")]
    pub engine_version: Option<String>,

    /// Server base URL (overrides the config file)
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Print rows as JSON records instead of a grid
    #[arg(long)]
    pub json: bool,
}

impl DataArgs {
    /// Builds the request. Validation happens when it is polled.
    pub fn to_request(&self) -> DataRequest {
        DataRequest {
            node: self.node.clone(),
            metrics: self.metrics.clone(),
            dimensions: self.dimensions.clone(),
            filters: self.filters.clone(),
            engine_name: self.engine_name.clone(),
            engine_version: self.engine_version.clone(),
        }
    }
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}
