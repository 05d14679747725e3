//! Track store: persists each track's progress through the state machine
//! so a batch can be resumed after interruption.
//!
//! **Grounded on:** `wkmp-ai/src/services/filename_matcher.rs` (existence
//! check against a `path` column before deciding new-vs-reuse) generalized
//! from a binary new/reuse/already-processed result to the full
//! `ProcessingState` machine, and to storing/reloading the whole `Track`
//! record rather than just a path-to-id mapping.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{ProcessingState, Track};

pub struct TrackStore {
    pool: SqlitePool,
}

impl TrackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a track's row, keyed by `(batch_id, source_path)`.
    pub async fn upsert(&self, id: Uuid, track: &Track) -> Result<()> {
        let payload = serde_json::to_string(track).map_err(|e| {
            crate::error::Error::Internal(format!("serializing track record: {e}"))
        })?;
        sqlx::query(
            r#"
            INSERT INTO tracks (id, batch_id, source_path, state, payload, last_error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(batch_id, source_path) DO UPDATE SET
                state = excluded.state,
                payload = excluded.payload,
                last_error = excluded.last_error,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(id.to_string())
        .bind(track.batch_id.to_string())
        .bind(track.source_path.to_string_lossy().to_string())
        .bind(state_str(track.state))
        .bind(payload)
        .bind(&track.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All tracks for a batch that have not reached a terminal state yet,
    /// used by the resume path (§4.1 phase 1): tracks already `applied`,
    /// `queued_for_review`, `unmatched`, or `failed` are skipped.
    pub async fn pending_for_batch(&self, batch_id: Uuid) -> Result<Vec<Track>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT payload FROM tracks
            WHERE batch_id = ? AND state NOT IN ('applied', 'queued_for_review', 'unmatched', 'failed')
            "#,
        )
        .bind(batch_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload).map_err(|e| {
                    crate::error::Error::Internal(format!("deserializing track record: {e}"))
                })
            })
            .collect()
    }

    /// All tracks for a batch regardless of state, for reporting.
    pub async fn all_for_batch(&self, batch_id: Uuid) -> Result<Vec<Track>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT payload FROM tracks WHERE batch_id = ?")
            .bind(batch_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload).map_err(|e| {
                    crate::error::Error::Internal(format!("deserializing track record: {e}"))
                })
            })
            .collect()
    }
}

fn state_str(state: ProcessingState) -> &'static str {
    match state {
        ProcessingState::Pending => "pending",
        ProcessingState::Fingerprinted => "fingerprinted",
        ProcessingState::Resolved => "resolved",
        ProcessingState::Classified => "classified",
        ProcessingState::Applied => "applied",
        ProcessingState::QueuedForReview => "queued_for_review",
        ProcessingState::Unmatched => "unmatched",
        ProcessingState::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn test_pool() -> SqlitePool {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database(&dir.path().join("t.db")).await.unwrap();
        // keep tempdir alive for the pool's lifetime by leaking it in tests
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn resume_skips_terminal_tracks() {
        let pool = test_pool().await;
        let store = TrackStore::new(pool);
        let batch_id = Uuid::new_v4();

        let mut pending = Track::new(batch_id, PathBuf::from("a.mp3"), 100, "mp3".into());
        pending.state = ProcessingState::Fingerprinted;
        store.upsert(Uuid::new_v4(), &pending).await.unwrap();

        let mut done = Track::new(batch_id, PathBuf::from("b.mp3"), 100, "mp3".into());
        done.state = ProcessingState::Applied;
        store.upsert(Uuid::new_v4(), &done).await.unwrap();

        let resumable = store.pending_for_batch(batch_id).await.unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].source_path, PathBuf::from("a.mp3"));
    }
}
