//! Generic adapter tests against a live PostgreSQL server.
//!
//! Set DATABASE_URL to run them; they skip otherwise.

use dj_query::db::{ColumnType, GenericSqlAdapter, Value};
use dj_query::error::DjqError;

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty())
}

#[tokio::test]
async fn test_postgres_batch_with_mapped_columns() {
    let Some(url) = database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let outputs = GenericSqlAdapter::new(url)
        .run(
            "SELECT 1::int4 AS num, 'hello' AS greeting, now() AS at; SELECT 'a;b' AS s;",
            "default",
        )
        .await
        .unwrap();

    assert_eq!(outputs.len(), 2);
    let types: Vec<ColumnType> = outputs[0].columns.iter().map(|c| c.column_type).collect();
    assert_eq!(
        types,
        vec![ColumnType::Float, ColumnType::String, ColumnType::Datetime]
    );
    assert_eq!(outputs[0].rows[0][0], Value::Int(1));
    assert_eq!(outputs[1].rows, vec![vec![Value::String("a;b".to_string())]]);
}

#[tokio::test]
async fn test_postgres_missing_relation_is_not_found() {
    let Some(url) = database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = GenericSqlAdapter::new(url)
        .run("SELECT * FROM dj_query_no_such_table", "analytics")
        .await
        .unwrap_err();

    match err {
        DjqError::NotFound { object, catalog } => {
            assert_eq!(object, "dj_query_no_such_table");
            assert_eq!(catalog, "analytics");
        }
        other => panic!("expected not found, got {other:?}"),
    }
}
