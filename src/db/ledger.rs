//! Move Ledger: an append-only record of every file mutation the Safe
//! Organizer performs, so a batch (or a single track) can be rolled back.
//!
//! **Grounded on:** `wkmp-common/src/db/init.rs`'s migration style, and the
//! ordering contract in the organizer's design notes (§4.7): a ledger row
//! is only marked `moved` once the destination write has actually
//! succeeded, so a crash mid-move leaves a row rollback can still act on.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};

/// What kind of mutation a ledger row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Tags were rewritten in place; the destination equals the source
    /// path, so no file move happened.
    TagOnly,
    /// The file was relocated without a tag rewrite.
    Move,
    /// Tags were rewritten and the file was relocated.
    MoveWithTags,
}

impl OperationKind {
    fn as_str(self) -> &'static str {
        match self {
            OperationKind::TagOnly => "tag_only",
            OperationKind::Move => "move",
            OperationKind::MoveWithTags => "move_with_tags",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tag_only" => Ok(OperationKind::TagOnly),
            "move" => Ok(OperationKind::Move),
            "move_with_tags" => Ok(OperationKind::MoveWithTags),
            other => Err(Error::Internal(format!("unknown operation kind: {other}"))),
        }
    }
}

/// Whether a ledger row's mutation can still be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalState {
    Reversible,
    Reversed,
    Broken,
}

impl ReversalState {
    fn as_str(self) -> &'static str {
        match self {
            ReversalState::Reversible => "reversible",
            ReversalState::Reversed => "reversed",
            ReversalState::Broken => "broken",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reversible" => Ok(ReversalState::Reversible),
            "reversed" => Ok(ReversalState::Reversed),
            "broken" => Ok(ReversalState::Broken),
            other => Err(Error::Internal(format!("unknown reversal state: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub source_path: String,
    pub backup_path: Option<String>,
    pub destination_path: String,
    pub tags_written: bool,
    pub moved: bool,
    pub operation_kind: OperationKind,
    pub reversal_state: ReversalState,
}

pub struct MoveLedger {
    pool: SqlitePool,
}

impl MoveLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a new ledger row before any mutation begins. Returns the new
    /// record's id so callers can mark it complete afterward. Rows start
    /// `reversible`; rollback transitions them to `reversed` or `broken`.
    pub async fn begin(
        &self,
        batch_id: Uuid,
        source_path: &str,
        backup_path: Option<&str>,
        destination_path: &str,
        operation_kind: OperationKind,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO move_ledger
                (id, batch_id, source_path, backup_path, destination_path, tags_written, moved, operation_kind, reversal_state)
            VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(batch_id.to_string())
        .bind(source_path)
        .bind(backup_path)
        .bind(destination_path)
        .bind(operation_kind.as_str())
        .bind(ReversalState::Reversible.as_str())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn mark_tags_written(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE move_ledger SET tags_written = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_moved(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE move_ledger SET moved = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transition a record to `reversed` after a successful rollback.
    pub async fn mark_reversed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE move_ledger SET reversal_state = ? WHERE id = ?")
            .bind(ReversalState::Reversed.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transition a record to `broken` when rollback cannot fully undo it.
    pub async fn mark_broken(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE move_ledger SET reversal_state = ? WHERE id = ?")
            .bind(ReversalState::Broken.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records for a batch in append order. Ordered by `rowid` rather than
    /// `created_at`: SQLite's `CURRENT_TIMESTAMP` only has 1-second
    /// resolution, so two appends within the same second would otherwise
    /// sort arbitrarily and break the descending-rollback-order guarantee.
    pub async fn for_batch(&self, batch_id: Uuid) -> Result<Vec<MoveRecord>> {
        let rows: Vec<(String, String, String, Option<String>, String, i64, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT id, batch_id, source_path, backup_path, destination_path, tags_written, moved, operation_kind, reversal_state
            FROM move_ledger WHERE batch_id = ? ORDER BY rowid ASC
            "#,
        )
        .bind(batch_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, batch_id, source_path, backup_path, destination_path, tags_written, moved, operation_kind, reversal_state)| {
                Ok(MoveRecord {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| crate::error::Error::Internal(format!("bad ledger id: {e}")))?,
                    batch_id: Uuid::parse_str(&batch_id)
                        .map_err(|e| crate::error::Error::Internal(format!("bad ledger batch id: {e}")))?,
                    source_path,
                    backup_path,
                    destination_path,
                    tags_written: tags_written != 0,
                    moved: moved != 0,
                    operation_kind: OperationKind::from_str(&operation_kind)?,
                    reversal_state: ReversalState::from_str(&reversal_state)?,
                })
            })
            .collect()
    }
}
