//! End-to-end bitemporal CRUD scenarios against a real SQLite pool.

use chainloom::checkpoint::{Checkpoint, CheckpointBound};
use chainloom::config::{Backend, PoolOptions};
use chainloom::schema::{Column, ColumnType, Schema, Table};
use chainloom::store::query::FindManyArgs;
use chainloom::store::sqlite::SqliteIndexingStore;
use chainloom::store::value::Scalar;
use chainloom::store::IndexingStore;

fn token_schema() -> Schema {
    Schema {
        tables: vec![Table {
            name: "Token".to_string(),
            id_column: "id".to_string(),
            columns: vec![
                Column::new("id", ColumnType::String),
                Column::new("owner", ColumnType::String),
                Column::new("supply", ColumnType::BigInt),
            ],
        }],
        enums: vec![],
    }
}

fn block_schema() -> Schema {
    Schema {
        tables: vec![Table {
            name: "Block".to_string(),
            id_column: "number".to_string(),
            columns: vec![
                Column::new("number", ColumnType::Int),
                Column::new("hash", ColumnType::String),
            ],
        }],
        enums: vec![],
    }
}

async fn connect() -> SqliteIndexingStore {
    connect_with(token_schema()).await
}

async fn connect_with(schema: Schema) -> SqliteIndexingStore {
    let pool = PoolOptions {
        max_connections: 1,
        min_connections: 1,
        ..PoolOptions::default()
    };
    SqliteIndexingStore::connect("sqlite::memory:", pool, schema)
        .await
        .expect("connect should succeed against an in-memory database")
}

fn row(owner: &str, supply: &str) -> chainloom::store::value::Row {
    let mut row = chainloom::store::value::Row::new();
    row.insert("owner".to_string(), Scalar::Str(owner.to_string()));
    row.insert("supply".to_string(), Scalar::BigInt(supply.to_string()));
    row
}

fn cp(block_number: u64) -> Checkpoint {
    Checkpoint::new(1_700_000_000 + block_number, 1, block_number, 0, 0)
}

#[tokio::test]
async fn create_then_find_latest_roundtrips() {
    let store = connect().await;
    store
        .create("Token", Scalar::Str("0x1".to_string()), row("alice", "100"), cp(1))
        .await
        .unwrap();

    let found = store
        .find_unique_latest("Token", &Scalar::Str("0x1".to_string()))
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(found.get("owner"), Some(&Scalar::Str("alice".to_string())));
    assert_eq!(found.get("supply"), Some(&Scalar::BigInt("100".to_string())));
}

#[tokio::test]
async fn update_at_same_checkpoint_squashes_in_place() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();

    let mut patch = chainloom::store::value::Row::new();
    patch.insert("supply".to_string(), Scalar::BigInt("150".to_string()));
    store.update("Token", id.clone(), patch, cp(1)).await.unwrap();

    // Still exactly one version, now reflecting the squashed patch.
    let latest = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
    assert_eq!(latest.get("supply"), Some(&Scalar::BigInt("150".to_string())));
    assert_eq!(latest.get("owner"), Some(&Scalar::Str("alice".to_string())));

    // The version "as of" the original checkpoint already shows the squash,
    // since there was never a second version opened.
    let at_cp1 = store
        .find_unique("Token", &id, CheckpointBound::At(cp(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at_cp1.get("supply"), Some(&Scalar::BigInt("150".to_string())));
}

#[tokio::test]
async fn update_at_later_checkpoint_branches_a_new_version() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();

    let mut patch = chainloom::store::value::Row::new();
    patch.insert("owner".to_string(), Scalar::Str("bob".to_string()));
    store.update("Token", id.clone(), patch, cp(2)).await.unwrap();

    // Reading as of the first checkpoint still sees the original owner...
    let at_cp1 = store
        .find_unique("Token", &id, CheckpointBound::At(cp(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at_cp1.get("owner"), Some(&Scalar::Str("alice".to_string())));

    // ...while the latest version reflects the branch.
    let latest = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
    assert_eq!(latest.get("owner"), Some(&Scalar::Str("bob".to_string())));
    assert_eq!(latest.get("supply"), Some(&Scalar::BigInt("100".to_string())));
}

#[tokio::test]
async fn list_versions_returns_every_branch_oldest_first() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();

    let mut patch = chainloom::store::value::Row::new();
    patch.insert("owner".to_string(), Scalar::Str("bob".to_string()));
    store.update("Token", id.clone(), patch, cp(2)).await.unwrap();

    let versions = store.list_versions("Token", &id).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].row.get("owner"), Some(&Scalar::Str("alice".to_string())));
    assert_eq!(versions[0].effective_from, cp(1));
    assert_eq!(versions[0].effective_to, CheckpointBound::At(cp(2)));
    assert_eq!(versions[1].row.get("owner"), Some(&Scalar::Str("bob".to_string())));
    assert_eq!(versions[1].effective_to, CheckpointBound::Latest);
}

#[tokio::test]
async fn delete_at_opening_checkpoint_removes_the_row_outright() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();
    store.delete("Token", id.clone(), cp(1)).await.unwrap();

    assert!(store.find_unique_latest("Token", &id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_at_later_checkpoint_closes_but_preserves_history() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();
    store.delete("Token", id.clone(), cp(2)).await.unwrap();

    assert!(store.find_unique_latest("Token", &id).await.unwrap().is_none());
    let at_cp1 = store
        .find_unique("Token", &id, CheckpointBound::At(cp(1)))
        .await
        .unwrap();
    assert!(at_cp1.is_some(), "the version valid at cp(1) should still be visible historically");
}

#[tokio::test]
async fn revert_undoes_writes_opened_at_or_after_the_safe_checkpoint() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();

    let mut patch = chainloom::store::value::Row::new();
    patch.insert("owner".to_string(), Scalar::Str("bob".to_string()));
    store.update("Token", id.clone(), patch, cp(2)).await.unwrap();

    // Revert back to cp(2): the branch opened at cp(2) is undone, reopening
    // the version that was closed by it.
    store.revert("Token", cp(2)).await.unwrap();

    let latest = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
    assert_eq!(latest.get("owner"), Some(&Scalar::Str("alice".to_string())));

    // Calling revert again with the same safe checkpoint changes nothing.
    store.revert("Token", cp(2)).await.unwrap();
    let latest_again = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
    assert_eq!(latest_again.get("owner"), Some(&Scalar::Str("alice".to_string())));
}

#[tokio::test]
async fn upsert_creates_when_absent_and_updates_when_present() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.upsert("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();
    assert!(store.find_unique_latest("Token", &id).await.unwrap().is_some());

    store.upsert("Token", id.clone(), row("alice", "200"), cp(1)).await.unwrap();
    let latest = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
    assert_eq!(latest.get("supply"), Some(&Scalar::BigInt("200".to_string())));
}

#[tokio::test]
async fn find_many_pages_forward_using_the_returned_cursor() {
    let store = connect().await;
    for i in 0..5u64 {
        let id = Scalar::Str(format!("0x{i}"));
        store.create("Token", id, row("alice", "1"), cp(i)).await.unwrap();
    }

    let first_page = store
        .find_many_latest(
            "Token",
            FindManyArgs {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first_page.items.len(), 2);
    let cursor = first_page.next_cursor.expect("more rows remain");

    let second_page = store
        .find_many_latest(
            "Token",
            FindManyArgs {
                limit: Some(2),
                cursor: Some(cursor),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(second_page.items.len(), 2);
    // No overlap between pages.
    let first_ids: Vec<_> = first_page.items.iter().map(|r| r.get("owner").cloned()).collect();
    let second_ids: Vec<_> = second_page.items.iter().map(|r| r.get("owner").cloned()).collect();
    assert_eq!(first_ids.len(), second_ids.len());
}

#[tokio::test]
async fn find_many_pages_forward_over_an_int_id_column() {
    let store = connect_with(block_schema()).await;
    for i in 0..5i64 {
        let mut row = chainloom::store::value::Row::new();
        row.insert("hash".to_string(), Scalar::Str(format!("0xhash{i}")));
        store.create("Block", Scalar::Int(i), row, cp(i as u64)).await.unwrap();
    }

    let first_page = store
        .find_many_latest(
            "Block",
            FindManyArgs {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first_page.items.len(), 2);
    let cursor = first_page
        .next_cursor
        .expect("an int id column must still report a next_cursor when more rows remain");

    let second_page = store
        .find_many_latest(
            "Block",
            FindManyArgs {
                limit: Some(2),
                cursor: Some(cursor),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(second_page.items.len(), 2);
    let first_hashes: Vec<_> = first_page.items.iter().map(|r| r.get("hash").cloned()).collect();
    let second_hashes: Vec<_> = second_page.items.iter().map(|r| r.get("hash").cloned()).collect();
    for h in &second_hashes {
        assert!(!first_hashes.contains(h), "pages must not overlap");
    }
}

#[tokio::test]
async fn create_over_an_existing_current_version_is_an_already_exists_error() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(5)).await.unwrap();

    // A second `create` for the same id fails outright, whether the
    // attempted checkpoint is before, at, or after the current version's
    // `effectiveFromCheckpoint` — `create` is never a backdoor update.
    let result = store.create("Token", id.clone(), row("bob", "1"), cp(1)).await;
    assert!(
        matches!(result, Err(chainloom::error::StoreError::AlreadyExists { .. })),
        "create must refuse to overwrite an existing current version"
    );

    let result = store.create("Token", id.clone(), row("bob", "1"), cp(5)).await;
    assert!(matches!(result, Err(chainloom::error::StoreError::AlreadyExists { .. })));

    let result = store.create("Token", id, row("bob", "1"), cp(9)).await;
    assert!(matches!(result, Err(chainloom::error::StoreError::AlreadyExists { .. })));
}

#[tokio::test]
async fn update_before_the_current_checkpoint_is_a_past_write_error() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(5)).await.unwrap();

    let mut patch = chainloom::store::value::Row::new();
    patch.insert("owner".to_string(), Scalar::Str("bob".to_string()));
    let result = store.update("Token", id, patch, cp(1)).await;
    assert!(
        matches!(result, Err(chainloom::error::StoreError::PastWrite { .. })),
        "writing before the current version's checkpoint must fail"
    );
}

#[tokio::test]
async fn update_with_computes_the_patch_from_the_current_row() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());
    store.create("Token", id.clone(), row("alice", "100"), cp(1)).await.unwrap();

    store
        .update_with("Token", id.clone(), cp(2), |current| {
            let supply = match current.get("supply") {
                Some(Scalar::BigInt(s)) => s.parse::<u64>().unwrap_or(0),
                _ => 0,
            };
            let mut patch = chainloom::store::value::Row::new();
            patch.insert("supply".to_string(), Scalar::BigInt((supply + 50).to_string()));
            patch
        })
        .await
        .unwrap();

    let latest = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
    assert_eq!(latest.get("supply"), Some(&Scalar::BigInt("150".to_string())));
    assert_eq!(latest.get("owner"), Some(&Scalar::Str("alice".to_string())));
}

#[tokio::test]
async fn update_with_fails_not_found_when_no_current_version_exists() {
    let store = connect().await;
    let id = Scalar::Str("0xdead".to_string());
    let result = store.update_with("Token", id, cp(1), |current| current).await;
    assert!(matches!(result, Err(chainloom::error::StoreError::NotFound { .. })));
}

#[tokio::test]
async fn upsert_with_creates_when_absent_and_patches_from_current_when_present() {
    let store = connect().await;
    let id = Scalar::Str("0x1".to_string());

    store
        .upsert_with("Token", id.clone(), cp(1), row("alice", "100"), |current| current)
        .await
        .unwrap();
    assert_eq!(
        store.find_unique_latest("Token", &id).await.unwrap().unwrap().get("owner"),
        Some(&Scalar::Str("alice".to_string()))
    );

    store
        .upsert_with("Token", id.clone(), cp(2), row("bob", "0"), |_current| {
            let mut patch = chainloom::store::value::Row::new();
            patch.insert("owner".to_string(), Scalar::Str("carol".to_string()));
            patch
        })
        .await
        .unwrap();
    let latest = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
    assert_eq!(latest.get("owner"), Some(&Scalar::Str("carol".to_string())));
    assert_eq!(latest.get("supply"), Some(&Scalar::BigInt("100".to_string())), "unpatched columns carry over");
}

#[tokio::test]
async fn update_many_with_patches_every_matching_current_row() {
    let store = connect().await;
    for i in 0..3u64 {
        let id = Scalar::Str(format!("0x{i}"));
        store.create("Token", id, row("alice", "10"), cp(i)).await.unwrap();
    }

    let updated = store
        .update_many_with("Token", FindManyArgs::default(), cp(10), |current| {
            let supply = match current.get("supply") {
                Some(Scalar::BigInt(s)) => s.parse::<u64>().unwrap_or(0),
                _ => 0,
            };
            let mut patch = chainloom::store::value::Row::new();
            patch.insert("supply".to_string(), Scalar::BigInt((supply * 2).to_string()));
            patch
        })
        .await
        .unwrap();
    assert_eq!(updated, 3);

    for i in 0..3u64 {
        let id = Scalar::Str(format!("0x{i}"));
        let latest = store.find_unique_latest("Token", &id).await.unwrap().unwrap();
        assert_eq!(latest.get("supply"), Some(&Scalar::BigInt("20".to_string())));
    }
}

#[test]
fn sqlite_backend_variant_exists() {
    // `Backend::Sqlite` is reachable with the default feature set.
    let _ = Backend::Sqlite;
}
