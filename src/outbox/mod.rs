//! Transactional outbox
//!
//! Durable queue bridging the event log to independent downstream consumers
//! (projectors, the bus publisher). Each consumer claims batches with its
//! own cursor via `FOR UPDATE SKIP LOCKED`, so slow consumers never block
//! fast ones and replica workers of the same consumer never double-claim a
//! row.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::domain::{OperationContext, StoredEvent};

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A row claimed from the outbox for processing by one consumer.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub id: i64,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_version: i64,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A batch claimed from the outbox, still holding the row locks for the
/// rows it carries via an open transaction.
pub struct ClaimedBatch {
    pub messages: Vec<OutboxMessage>,
    tx: Option<Transaction<'static, Postgres>>,
}

impl ClaimedBatch {
    /// Record `ids` (a subset of `messages`) as processed by `consumer` and
    /// commit, releasing the claim. Ids left out of `ids` are released back
    /// unprocessed, available to the next claim.
    pub async fn mark_processed(mut self, ids: &[i64], consumer: &str) -> Result<(), OutboxError> {
        let Some(mut tx) = self.tx.take() else {
            return Ok(());
        };

        for id in ids {
            sqlx::query(
                r#"
                INSERT INTO outbox_consumer_processing (outbox_id, consumer_name, processed_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (outbox_id, consumer_name) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(consumer)
            .execute(&mut *tx)
            .await?;
        }

        if !ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE outbox SET processed_at = NOW(), consumer = $2
                WHERE id = ANY($1)
                "#,
            )
            .bind(ids)
            .bind(consumer)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Outbox {
    pool: PgPool,
}

impl Outbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue committed events for later delivery to every consumer.
    /// A duplicate `(aggregate_id, event_version, event_type)` is treated as
    /// already-durable and swallowed rather than raised.
    pub async fn enqueue(
        &self,
        events: &[StoredEvent],
        context: &OperationContext,
    ) -> Result<(), OutboxError> {
        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO outbox (
                    aggregate_id, event_type, event_version, payload,
                    correlation_id, causation_id, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (aggregate_id, event_version, event_type) DO NOTHING
                "#,
            )
            .bind(&event.aggregate_id)
            .bind(&event.event_type)
            .bind(event.version)
            .bind(&event.event_data)
            .bind(context.correlation_id.map(|u| u.to_string()))
            .bind(context.causation_id.map(|u| u.to_string()))
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    aggregate_id = %event.aggregate_id,
                    event_version = event.version,
                    "outbox row already present, skipping enqueue"
                );
            }
        }

        Ok(())
    }

    /// Claim up to `size` unprocessed rows for `consumer`, skipping rows
    /// locked by concurrent claimers. The claim is held open in a
    /// transaction — the returned [`ClaimedBatch`] keeps the row locks in
    /// place until the caller calls `mark_processed`, so no other replica of
    /// `consumer` can claim the same rows while this batch is being applied.
    /// Dropping the batch without marking it processed rolls the
    /// transaction back and releases the locks.
    pub async fn claim_batch(
        &self,
        consumer: &str,
        size: i64,
    ) -> Result<ClaimedBatch, OutboxError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT o.id, o.aggregate_id, o.event_type, o.event_version, o.payload,
                   o.correlation_id, o.causation_id, o.created_at
            FROM outbox o
            WHERE NOT EXISTS (
                SELECT 1 FROM outbox_consumer_processing p
                WHERE p.outbox_id = o.id AND p.consumer_name = $1
            )
            ORDER BY o.id ASC
            LIMIT $2
            FOR UPDATE OF o SKIP LOCKED
            "#,
        )
        .bind(consumer)
        .bind(size)
        .fetch_all(&mut *tx)
        .await?;

        let messages = rows
            .into_iter()
            .map(|row| {
                Ok(OutboxMessage {
                    id: row.try_get("id")?,
                    aggregate_id: row.try_get("aggregate_id")?,
                    event_type: row.try_get("event_type")?,
                    event_version: row.try_get("event_version")?,
                    payload: row.try_get("payload")?,
                    correlation_id: row.try_get("correlation_id")?,
                    causation_id: row.try_get("causation_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(ClaimedBatch {
            messages,
            tx: Some(tx),
        })
    }

    /// Count rows not yet processed by `consumer` (or, if `None`, rows with
    /// no legacy `processed_at` stamp at all).
    pub async fn get_unprocessed_count(
        &self,
        consumer: Option<&str>,
    ) -> Result<i64, OutboxError> {
        let count: i64 = match consumer {
            Some(consumer) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM outbox o
                    WHERE NOT EXISTS (
                        SELECT 1 FROM outbox_consumer_processing p
                        WHERE p.outbox_id = o.id AND p.consumer_name = $1
                    )
                    "#,
                )
                .bind(consumer)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE processed_at IS NULL")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Age of the oldest unprocessed row, used as a lag metric.
    pub async fn get_outbox_lag(&self) -> Result<Option<ChronoDuration>, OutboxError> {
        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(created_at) FROM outbox WHERE processed_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(oldest.map(|created_at| Utc::now() - created_at))
    }

    /// Delete rows processed more than `older_than_days` ago by every known consumer.
    pub async fn cleanup(&self, older_than_days: i64) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox
            WHERE processed_at IS NOT NULL AND processed_at < NOW() - ($1 || ' days')::interval
            "#,
        )
        .bind(older_than_days.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Clear the `consumer` column for rows stuck unprocessed, so any
    /// consumer replica may reclaim them. Used by recovery.
    pub async fn reset_stale(&self, older_than: ChronoDuration) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET consumer = NULL
            WHERE processed_at IS NULL AND created_at < $1
            "#,
        )
        .bind(Utc::now() - older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_message_carries_version_for_ordering() {
        let message = OutboxMessage {
            id: 1,
            aggregate_id: "w1".to_string(),
            event_type: "WalletCredited".to_string(),
            event_version: 2,
            payload: serde_json::json!({}),
            correlation_id: None,
            causation_id: None,
            created_at: Utc::now(),
        };
        assert_eq!(message.event_version, 2);
    }
}
