//! Namespace lifecycle (reload/publish) against a real SQLite pool.

use std::sync::Arc;

use chainloom::schema::{Column, ColumnType, Schema, Table};
use chainloom::store::namespace::sqlite::SqliteNamespaceManager;
use chainloom::store::namespace::NamespaceManager;
use sqlx::sqlite::SqlitePoolOptions;

fn token_schema() -> Schema {
    Schema {
        tables: vec![Table {
            name: "Token".to_string(),
            id_column: "id".to_string(),
            columns: vec![
                Column::new("id", ColumnType::String),
                Column::new("supply", ColumnType::BigInt),
            ],
        }],
        enums: vec![],
    }
}

#[tokio::test]
async fn reload_then_publish_creates_public_views() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    let manager = SqliteNamespaceManager::new(Arc::new(pool.clone()), "ponder", 1);
    manager.reload(&token_schema()).await.expect("reload should create the versioned table");
    manager.publish().await.expect("publish should create the public views");

    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlite_master WHERE type IN ('table', 'view')")
        .fetch_all(&pool)
        .await
        .unwrap();
    let names: Vec<&str> = rows.iter().map(|(n,)| n.as_str()).collect();
    assert!(names.iter().any(|n| n.contains("ponder_1__Token_versioned")));
    assert!(names.contains(&"Token_versioned"));
    assert!(names.contains(&"Token"));
}

#[tokio::test]
async fn publishing_a_second_namespace_supersedes_the_first() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    let first = SqliteNamespaceManager::new(Arc::new(pool.clone()), "ponder", 1);
    first.reload(&token_schema()).await.unwrap();
    first.publish().await.unwrap();

    let second = SqliteNamespaceManager::new(Arc::new(pool.clone()), "ponder", 2);
    second.reload(&token_schema()).await.unwrap();
    second.publish().await.unwrap();

    let rows: Vec<(String,)> = sqlx::query_as("SELECT namespace_version FROM ponder_metadata")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "publish deletes every other metadata row");
    assert_eq!(rows[0].0, "ponder_2");
}

#[tokio::test]
async fn close_is_idempotent() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");

    let manager = SqliteNamespaceManager::new(Arc::new(pool), "ponder", 1);
    manager.reload(&token_schema()).await.unwrap();
    manager.publish().await.unwrap();

    manager.close().await.expect("first close succeeds");
    manager.close().await.expect("second close is swallowed, not an error");
}
