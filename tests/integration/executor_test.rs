//! Query executor tests over on-disk state and both results stores.

use std::sync::Arc;

use dj_query::db::{ExecutionContext, Value};
use dj_query::persistence::{
    engines, queries, FileSystemResults, ResultsBackend, SqliteResults, StateDb,
};
use dj_query::query::{Query, QueryExecutor, QueryState};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use super::sqlite_engine;

async fn executor_with(db: &StateDb, results: Arc<dyn ResultsBackend>) -> QueryExecutor {
    engines::upsert_engine(db.pool(), &sqlite_engine())
        .await
        .unwrap();
    QueryExecutor::new(db.pool().clone(), results)
}

fn lite_query(sql: &str) -> Query {
    Query::new("default", "lite", "3", sql)
}

#[tokio::test]
async fn test_batch_yields_one_result_per_statement_in_order() {
    let db = StateDb::open_in_memory().await.unwrap();
    let executor = executor_with(&db, Arc::new(SqliteResults::new(db.pool().clone()))).await;

    let sql = "CREATE TABLE t (a INTEGER, b TEXT); \
               INSERT INTO t VALUES (1, 'x'), (2, 'y'); \
               SELECT a, b FROM t ORDER BY a; \
               SELECT 'semi;colon' AS s";
    let result = executor
        .process_query(lite_query(sql), &ExecutionContext::default())
        .await
        .unwrap();

    assert_eq!(result.state(), QueryState::Finished);
    assert!(result.errors.is_empty());
    assert_eq!(result.results.len(), 4);

    let select = &result.results.root[2];
    assert_eq!(select.sql, "SELECT a, b FROM t ORDER BY a");
    let names: Vec<&str> = select.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(
        select.rows,
        vec![
            vec![Value::Int(1), Value::String("x".to_string())],
            vec![Value::Int(2), Value::String("y".to_string())],
        ]
    );

    let quoted = &result.results.root[3];
    assert_eq!(quoted.rows, vec![vec![Value::String("semi;colon".to_string())]]);

    for statement in &result.results.root {
        assert_eq!(statement.row_count, statement.rows.len());
    }
}

#[tokio::test]
async fn test_failed_batch_keeps_no_partial_results() {
    let db = StateDb::open_in_memory().await.unwrap();
    let results: Arc<dyn ResultsBackend> = Arc::new(SqliteResults::new(db.pool().clone()));
    let executor = executor_with(&db, Arc::clone(&results)).await;

    let query = lite_query("SELECT 1; SELECT * FROM missing_table; SELECT 3");
    let id = query.id;
    let result = executor
        .process_query(query, &ExecutionContext::default())
        .await
        .unwrap();

    assert_eq!(result.state(), QueryState::Failed);
    assert!(result.results.is_empty());
    assert_eq!(result.errors.len(), 1);

    let (stored, errors) = queries::get_query(db.pool(), id).await.unwrap().unwrap();
    assert_eq!(stored.state, QueryState::Failed);
    assert_eq!(errors, result.errors);

    let stored_results = results.get_results(id).await.unwrap().unwrap();
    assert!(stored_results.is_empty());
}

#[tokio::test]
async fn test_finished_query_timestamps_are_ordered() {
    let db = StateDb::open_in_memory().await.unwrap();
    let executor = executor_with(&db, Arc::new(SqliteResults::new(db.pool().clone()))).await;

    let result = executor
        .process_query(lite_query("SELECT 1"), &ExecutionContext::default())
        .await
        .unwrap();

    let query = &result.query;
    let scheduled = query.scheduled.unwrap();
    let started = query.started.unwrap();
    let finished = query.finished.unwrap();
    assert!(scheduled <= started);
    assert!(started <= finished);
    assert_eq!(query.progress, 1.0);
    assert_eq!(query.executed_query.as_deref(), Some("SELECT 1"));

    let (stored, _) = queries::get_query(db.pool(), query.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, QueryState::Finished);
    assert!(stored.started.unwrap() <= stored.finished.unwrap());
}

#[tokio::test]
async fn test_on_disk_state_with_filesystem_results() {
    let dir = tempdir().unwrap();
    let results_dir = dir.path().join("results");
    let db = StateDb::open(&dir.path().join("state.db")).await.unwrap();
    let results: Arc<dyn ResultsBackend> =
        Arc::new(FileSystemResults::new(&results_dir).unwrap());
    let executor = executor_with(&db, Arc::clone(&results)).await;

    let query = lite_query("SELECT 42 AS answer");
    let id = query.id;
    let result = executor
        .process_query(query, &ExecutionContext::default())
        .await
        .unwrap();
    assert_eq!(result.state(), QueryState::Finished);

    let stored = results.get_results(id).await.unwrap().unwrap();
    assert_eq!(stored, result.results);
    assert_eq!(std::fs::read_dir(&results_dir).unwrap().count(), 1);

    db.close().await;
    let reopened = StateDb::open(&dir.path().join("state.db")).await.unwrap();
    let (query, _) = queries::get_query(reopened.pool(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(query.state, QueryState::Finished);
}

#[tokio::test]
async fn test_results_are_written_once() {
    let db = StateDb::open_in_memory().await.unwrap();
    let results: Arc<dyn ResultsBackend> = Arc::new(SqliteResults::new(db.pool().clone()));
    let executor = executor_with(&db, Arc::clone(&results)).await;

    let query = lite_query("SELECT 1 AS one");
    let rerun = Query {
        submitted_query: "SELECT 2 AS two".to_string(),
        ..query.clone()
    };
    let first = executor
        .process_query(query, &ExecutionContext::default())
        .await
        .unwrap();

    let err = executor
        .process_query(rerun, &ExecutionContext::default())
        .await;
    assert!(err.is_err());

    let stored = results.get_results(first.query.id).await.unwrap().unwrap();
    assert_eq!(stored, first.results);
}

#[tokio::test]
async fn test_connection_override_replaces_engine_uri() {
    let db = StateDb::open_in_memory().await.unwrap();
    let executor = executor_with(&db, Arc::new(SqliteResults::new(db.pool().clone()))).await;
    let broken = dj_query::engine::Engine::new(
        "broken",
        "1",
        dj_query::engine::EngineType::Sqlalchemy,
        "mysql://nowhere/db",
    );
    engines::upsert_engine(db.pool(), &broken).await.unwrap();

    let ctx = ExecutionContext::default()
        .with_connection_override(Some("sqlite::memory:".to_string()));
    let result = executor
        .process_query(Query::new("default", "broken", "1", "SELECT 7"), &ctx)
        .await
        .unwrap();

    assert_eq!(result.state(), QueryState::Finished);
    assert_eq!(result.results.root[0].rows, vec![vec![Value::Int(7)]]);
}
