//! dj-query - query execution service.
//!
//! Runs SQL against heterogeneous backends, tracks each query's lifecycle,
//! serves it over HTTP and polls remote jobs to completion.

pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod query;
pub mod server;
