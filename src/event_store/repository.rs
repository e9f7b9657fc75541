//! Event store repository
//!
//! Core implementation of the append-only event log. A single aggregate's
//! history is a "stream" identified by `(aggregate_type, aggregate_id)`.
//! Appends are protected by optimistic concurrency: the caller supplies the
//! version it believes the stream is at, and the append fails atomically if
//! that assumption is stale.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::{OperationContext, StoredEvent};

use super::EventStoreError;

/// A single event queued for append within one `append_to_stream` call.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl PendingEvent {
    pub fn new<E: Serialize>(event_type: &str, event: &E) -> Result<Self, EventStoreError> {
        Ok(Self {
            event_type: event_type.to_string(),
            event_data: serde_json::to_value(event)?,
        })
    }
}

/// A stream identifier: aggregate type plus aggregate id.
#[derive(Debug, Clone)]
pub struct StreamId {
    pub aggregate_type: &'static str,
    pub aggregate_id: String,
}

/// Sentinel passed as `expected_version` meaning "this stream must not exist yet".
pub const EXPECTED_NO_STREAM: i64 = -1;

/// Event store for persisting and retrieving per-aggregate event streams.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append events to a stream under an optimistic-concurrency guard.
    ///
    /// `expected_version` must equal the stream's current head version, or
    /// [`EXPECTED_NO_STREAM`] if the stream is not expected to exist yet.
    pub async fn append_to_stream(
        &self,
        stream: &StreamId,
        events: Vec<PendingEvent>,
        expected_version: i64,
        context: &OperationContext,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut tx = self.pool.begin().await?;

        let current_version = self
            .current_version(&mut tx, &stream.aggregate_id)
            .await?;

        if current_version != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: stream.aggregate_id.clone(),
                expected: expected_version,
                actual: current_version,
            });
        }

        let mut stored = Vec::with_capacity(events.len());
        let mut version = expected_version;

        for pending in events {
            version += 1;
            let now = Utc::now();

            let row: (i64,) = sqlx::query_as(
                r#"
                INSERT INTO events (
                    aggregate_type, aggregate_id, version,
                    event_type, event_data, correlation_id, causation_id, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(stream.aggregate_type)
            .bind(&stream.aggregate_id)
            .bind(version)
            .bind(&pending.event_type)
            .bind(&pending.event_data)
            .bind(context.correlation_id.map(|u| u.to_string()))
            .bind(context.causation_id.map(|u| u.to_string()))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            stored.push(StoredEvent {
                id: row.0,
                aggregate_type: stream.aggregate_type.to_string(),
                aggregate_id: stream.aggregate_id.clone(),
                version,
                event_type: pending.event_type,
                event_data: pending.event_data,
                correlation_id: context.correlation_id.map(|u| u.to_string()),
                causation_id: context.causation_id.map(|u| u.to_string()),
                created_at: now,
            });
        }

        tx.commit().await?;

        Ok(stored)
    }

    async fn current_version(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<i64, EventStoreError> {
        let result: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        Ok(result.unwrap_or(EXPECTED_NO_STREAM))
    }

    /// Read the full stream for an aggregate, ascending by version.
    pub async fn read_stream(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.read_stream_from_version(aggregate_id, 0).await
    }

    /// Read a stream starting at `from_version` (inclusive), ascending.
    pub async fn read_stream_from_version(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, version, event_type, event_data,
                   correlation_id, causation_id, created_at
            FROM events
            WHERE aggregate_id = $1 AND version >= $2
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(from_version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredEvent {
                    id: row.try_get("id")?,
                    aggregate_type: row.try_get("aggregate_type")?,
                    aggregate_id: row.try_get("aggregate_id")?,
                    version: row.try_get("version")?,
                    event_type: row.try_get("event_type")?,
                    event_data: row.try_get("event_data")?,
                    correlation_id: row.try_get("correlation_id")?,
                    causation_id: row.try_get("causation_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(EventStoreError::from)
    }

    /// Deserialize an aggregate's events and fold them with [`Aggregate::apply`].
    pub async fn load_aggregate<A>(&self, aggregate_id: &str) -> Result<Option<A>, EventStoreError>
    where
        A: Aggregate + Default,
        A::Event: DeserializeOwned,
    {
        let events = self.read_stream(aggregate_id).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let mut aggregate = A::default();
        for stored in events {
            let event: A::Event = serde_json::from_value(stored.event_data)?;
            aggregate = aggregate.apply(event);
        }

        Ok(Some(aggregate))
    }

    /// Deserialize an aggregate from a snapshot plus the tail of events after it.
    pub async fn load_aggregate_from(
        &self,
        aggregate_id: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.read_stream_from_version(aggregate_id, from_version + 1)
            .await
    }

    /// Count events recorded for an aggregate (used to gate snapshotting).
    pub async fn event_count(&self, aggregate_id: &str) -> Result<i64, EventStoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// Generate a fresh correlation id for requests that did not supply one.
pub fn new_correlation_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WalletEvent;

    #[test]
    fn pending_event_serializes_payload() {
        let event = WalletEvent::WalletCredited {
            wallet_id: "w1".to_string(),
            amount: 100,
            description: None,
            credited_at: Utc::now(),
        };

        let pending = PendingEvent::new("WalletCredited", &event).unwrap();
        assert_eq!(pending.event_type, "WalletCredited");
        assert_eq!(pending.event_data["amount"], 100);
    }

    #[test]
    fn event_store_error_is_retryable() {
        let conflict = EventStoreError::ConcurrencyConflict {
            aggregate_id: "w1".to_string(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_concurrency_conflict());

        let not_found = EventStoreError::AggregateNotFound("w1".to_string());
        assert!(!not_found.is_retryable());
    }
}
