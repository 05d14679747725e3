//! Embedded persistence: connection setup, schema migration, and the
//! per-component stores (tracks, response cache, move ledger).
//!
//! **Grounded on:** `wkmp-common/src/db/init.rs` (pool construction,
//! `CREATE TABLE IF NOT EXISTS` migrations run unconditionally at startup,
//! `schema_version` bookkeeping table). All writes funnel through a single
//! `SqlitePool` configured with one connection (§5: "a single writer
//! connection serializes all mutating access"); reads may use the same
//! pool since SQLite WAL mode allows concurrent readers.

pub mod cache;
pub mod ledger;
pub mod tracks;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

const SCHEMA_VERSION: i64 = 1;

/// Open (creating if necessary) the SQLite database at `db_path` and run
/// all pending migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    // Single writer connection: the pipeline serializes mutating access
    // itself, so there is no benefit (and real risk of SQLITE_BUSY) in
    // letting sqlx hand out more than one.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            state TEXT NOT NULL,
            payload TEXT NOT NULL,
            last_error TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(batch_id, source_path)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_batch_state ON tracks(batch_id, state)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS response_cache (
            service TEXT NOT NULL,
            cache_key TEXT NOT NULL,
            response_json TEXT,
            is_negative INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (service, cache_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS move_ledger (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            backup_path TEXT,
            destination_path TEXT NOT NULL,
            tags_written INTEGER NOT NULL DEFAULT 0,
            moved INTEGER NOT NULL DEFAULT 0,
            operation_kind TEXT NOT NULL DEFAULT 'move_with_tags',
            reversal_state TEXT NOT NULL DEFAULT 'reversible',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_batch ON move_ledger(batch_id)")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_database_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("librarian.db");
        let pool1 = init_database(&path).await.unwrap();
        pool1.close().await;
        let pool2 = init_database(&path).await.unwrap();
        let version: (i64,) = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_one(&pool2)
            .await
            .unwrap();
        assert_eq!(version.0, SCHEMA_VERSION);
    }
}
