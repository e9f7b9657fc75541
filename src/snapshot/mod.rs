//! Snapshot store
//!
//! Periodic aggregate-state checkpoints used to shorten rehydration. Stored
//! in a dedicated table decoupled from the event log and from idempotency —
//! the event log remains the sole source of truth; a snapshot is a cache
//! that MUST always be followed by replaying any events after its version.

use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;

use crate::aggregate::Aggregate;

/// Default number of snapshots retained per aggregate.
pub const DEFAULT_KEEP_LAST: i64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A stored snapshot row.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub aggregate_id: String,
    pub version: i64,
    pub state: serde_json::Value,
}

/// Persists and prunes aggregate snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: PgPool,
    keep_last: i64,
}

impl SnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            keep_last: DEFAULT_KEEP_LAST,
        }
    }

    pub fn with_keep_last(mut self, keep_last: i64) -> Self {
        self.keep_last = keep_last;
        self
    }

    /// Fetch the latest snapshot for an aggregate, if any.
    pub async fn get_latest_snapshot<A>(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<A>, SnapshotError>
    where
        A: Aggregate + DeserializeOwned,
    {
        let row: Option<(i64, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT version, state
            FROM wallet_snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(A::aggregate_type())
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((_version, state)) => Ok(Some(serde_json::from_value(state)?)),
            None => Ok(None),
        }
    }

    /// Save a snapshot and prune older snapshots beyond `keep_last`.
    pub async fn save_snapshot<A>(&self, aggregate: &A) -> Result<(), SnapshotError>
    where
        A: Aggregate + Serialize,
    {
        let state = serde_json::to_value(aggregate)?;
        let aggregate_id = aggregate.id();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO wallet_snapshots (aggregate_type, aggregate_id, version, state, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(A::aggregate_type())
        .bind(&aggregate_id)
        .bind(aggregate.version())
        .bind(&state)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM wallet_snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
              AND version NOT IN (
                SELECT version FROM wallet_snapshots
                WHERE aggregate_type = $1 AND aggregate_id = $2
                ORDER BY version DESC
                LIMIT $3
              )
            "#,
        )
        .bind(A::aggregate_type())
        .bind(&aggregate_id)
        .bind(self.keep_last)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            aggregate_type = A::aggregate_type(),
            aggregate_id = %aggregate_id,
            version = aggregate.version(),
            "snapshot saved"
        );

        Ok(())
    }

    /// Save a snapshot only if the aggregate's version warrants it.
    pub async fn save_snapshot_if_needed<A>(&self, aggregate: &A) -> Result<bool, SnapshotError>
    where
        A: Aggregate + Serialize,
    {
        if !aggregate.should_snapshot() {
            return Ok(false);
        }
        self.save_snapshot(aggregate).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keep_last_matches_spec() {
        assert_eq!(DEFAULT_KEEP_LAST, 3);
    }
}
