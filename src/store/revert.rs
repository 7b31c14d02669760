//! Shared SQL text for the reorg revert controller.
//!
//! Both backends run the same two statements inside one transaction; only
//! the placeholder syntax (`$1` vs the quoted literal, since the dynamic
//! table name can't be bound as a parameter) differs, so the statement
//! shape lives here once.

use crate::checkpoint::Checkpoint;
use crate::schema::{EFFECTIVE_FROM, EFFECTIVE_TO};
use crate::store::serialize::quote;

/// `DELETE FROM <table> WHERE effectiveFromCheckpoint >= <cs>`.
///
/// Versions opened at or after the reorg's safe checkpoint never should
/// have existed on the canonical chain; they're removed entirely rather
/// than closed.
#[must_use]
pub fn delete_versions_from_sql(table: &str, safe_checkpoint: &Checkpoint) -> String {
    format!(
        "DELETE FROM {table} WHERE {EFFECTIVE_FROM} >= {}",
        quote(&safe_checkpoint.encode())
    )
}

/// `UPDATE <table> SET effectiveToCheckpoint = 'latest' WHERE effectiveToCheckpoint >= <cs> AND effectiveToCheckpoint <> 'latest'`.
///
/// Versions closed at or after the safe checkpoint were truncated by writes
/// that are themselves being reverted, so they reopen. The `<> 'latest'`
/// guard makes a repeated call with the same checkpoint a no-op: the
/// already-reopened rows no longer match.
#[must_use]
pub fn reopen_versions_sql(table: &str, safe_checkpoint: &Checkpoint) -> String {
    format!(
        "UPDATE {table} SET {EFFECTIVE_TO} = 'latest' WHERE {EFFECTIVE_TO} >= {} AND {EFFECTIVE_TO} <> 'latest'",
        quote(&safe_checkpoint.encode())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_sql_compares_against_encoded_checkpoint() {
        let cp = Checkpoint::new(1, 1, 1, 0, 0);
        let sql = delete_versions_from_sql("Account", &cp);
        assert!(sql.contains("DELETE FROM Account"));
        assert!(sql.contains(&cp.encode()));
    }

    #[test]
    fn reopen_sql_excludes_already_open_rows() {
        let cp = Checkpoint::new(1, 1, 1, 0, 0);
        let sql = reopen_versions_sql("Account", &cp);
        assert!(sql.contains("<> 'latest'"));
    }
}
