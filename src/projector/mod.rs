//! Projector runtime
//!
//! Long-lived workers that poll the outbox and update read models. Each
//! projector owns a durable checkpoint so delivery is at-least-once and
//! `apply` must be safe to run twice for the same message.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::time::interval;

use crate::outbox::{Outbox, OutboxError, OutboxMessage};

mod ledger;
mod read_model;

pub use ledger::LedgerProjector;
pub use read_model::ReadModelProjector;

#[derive(Debug, thiserror::Error)]
pub enum ProjectorError {
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("apply failed: {0}")]
    Apply(String),
}

/// A durable marker of the last outbox row a projector finished applying.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    pub last_processed_id: i64,
    pub last_processed_version: i64,
    pub aggregate_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Implemented by each concrete read-model builder.
#[async_trait]
pub trait Projector: Send + Sync {
    /// The consumer/checkpoint name; must match the outbox claim consumer.
    fn name(&self) -> &'static str;

    /// Apply a single message's effect to this projector's read model.
    async fn apply(&self, message: &OutboxMessage) -> Result<(), ProjectorError>;

    /// Defense-in-depth idempotency guard, checked before `apply`. The
    /// default implementation is never authoritative on its own: the
    /// outbox's per-consumer processing table is what actually prevents
    /// double delivery (see [`Outbox::claim_batch`]). This only spares a
    /// redundant `apply` call when the checkpoint already proves it.
    fn is_already_processed(&self, checkpoint: &Checkpoint, message: &OutboxMessage) -> bool {
        default_is_already_processed(checkpoint, message)
    }
}

/// Configuration for a projector's polling loop.
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub max_retries: u32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
            max_retries: 5,
        }
    }
}

/// Drives a [`Projector`] through claim -> apply -> checkpoint -> ack cycles.
pub struct ProjectorRuntime {
    pool: PgPool,
    outbox: Outbox,
    config: ProjectorConfig,
}

impl ProjectorRuntime {
    pub fn new(pool: PgPool) -> Self {
        Self {
            outbox: Outbox::new(pool.clone()),
            pool,
            config: ProjectorConfig::default(),
        }
    }

    pub fn with_config(pool: PgPool, config: ProjectorConfig) -> Self {
        Self {
            outbox: Outbox::new(pool.clone()),
            pool,
            config,
        }
    }

    /// Spawn the projector's polling loop as a background task.
    pub fn start(self: Arc<Self>, projector: Arc<dyn Projector>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(projector).await;
        })
    }

    async fn run(&self, projector: Arc<dyn Projector>) {
        tracing::info!(projector = projector.name(), "projector runtime started");

        let mut ticker = interval(self.config.poll_interval);
        let consecutive_errors = AtomicU32::new(0);

        loop {
            ticker.tick().await;

            match self.run_once(projector.as_ref()).await {
                Ok(processed) => {
                    consecutive_errors.store(0, Ordering::SeqCst);
                    if processed > 0 {
                        tracing::debug!(
                            projector = projector.name(),
                            processed,
                            "projector batch applied"
                        );
                    }
                }
                Err(e) => {
                    let errors = consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::error!(projector = projector.name(), error = %e, "projector batch failed");
                    if errors > self.config.max_retries {
                        tokio::time::sleep(self.config.error_backoff * errors).await;
                    }
                }
            }
        }
    }

    /// Claim and apply a single batch; returns the number of messages applied.
    pub async fn run_once(&self, projector: &dyn Projector) -> Result<usize, ProjectorError> {
        let checkpoint = self.get_checkpoint(projector.name()).await?;
        let claimed = self
            .outbox
            .claim_batch(projector.name(), self.config.batch_size)
            .await?;

        let mut processed_ids = Vec::with_capacity(claimed.messages.len());
        let mut latest = checkpoint.clone();
        // The checkpoint may only advance through a contiguous run of
        // successes from the start of the batch. Once a message fails to
        // apply, later successes in the same batch are still applied and
        // marked processed individually, but must not move the watermark
        // past the failed message — otherwise the next tick's primary
        // `last_processed_id` guard would wrongly treat the failed, never
        // applied message as already done.
        let mut gap_encountered = false;

        for message in &claimed.messages {
            if projector.is_already_processed(&checkpoint, message) {
                processed_ids.push(message.id);
                continue;
            }

            match projector.apply(message).await {
                Ok(()) => {
                    processed_ids.push(message.id);
                    if !gap_encountered {
                        latest.last_processed_id = message.id;
                        latest.last_processed_version = message.event_version;
                        latest.aggregate_id = Some(message.aggregate_id.clone());
                    }
                }
                Err(e) => {
                    gap_encountered = true;
                    tracing::error!(
                        projector = projector.name(),
                        outbox_id = message.id,
                        error = %e,
                        "projector apply failed, message will be retried"
                    );
                }
            }
        }

        if latest.last_processed_id != checkpoint.last_processed_id
            || latest.last_processed_version != checkpoint.last_processed_version
        {
            self.save_checkpoint(projector.name(), &latest).await?;
        }

        let processed = processed_ids.len();
        claimed
            .mark_processed(&processed_ids, projector.name())
            .await?;

        Ok(processed)
    }

    async fn get_checkpoint(&self, name: &str) -> Result<Checkpoint, ProjectorError> {
        let row = sqlx::query(
            r#"
            SELECT last_processed_id, last_processed_version, aggregate_id, metadata
            FROM projector_checkpoints
            WHERE projector_name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Checkpoint {
                last_processed_id: row.try_get("last_processed_id")?,
                last_processed_version: row.try_get("last_processed_version")?,
                aggregate_id: row.try_get("aggregate_id")?,
                metadata: row.try_get("metadata")?,
            },
            None => Checkpoint::default(),
        })
    }

    async fn save_checkpoint(
        &self,
        name: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), ProjectorError> {
        sqlx::query(
            r#"
            INSERT INTO projector_checkpoints (projector_name, last_processed_id, last_processed_version, aggregate_id, metadata, last_processed_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (projector_name)
            DO UPDATE SET last_processed_id = $2, last_processed_version = $3, aggregate_id = $4, metadata = $5, last_processed_at = NOW()
            "#,
        )
        .bind(name)
        .bind(checkpoint.last_processed_id)
        .bind(checkpoint.last_processed_version)
        .bind(&checkpoint.aggregate_id)
        .bind(&checkpoint.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Primary guard: the outbox id monotonically orders messages across
/// aggregates, so a checkpoint past a message's id means every message up to
/// it was already delivered (the checkpoint only ever advances through a
/// contiguous prefix, see `ProjectorRuntime::run_once`). The per-aggregate
/// version check is secondary, defense-in-depth only — it is never
/// authoritative on its own, and neither guard substitutes for the outbox's
/// per-consumer processing table, which is what actually prevents double
/// delivery.
fn default_is_already_processed(checkpoint: &Checkpoint, message: &OutboxMessage) -> bool {
    checkpoint.last_processed_id >= message.id
        || (checkpoint.aggregate_id.as_deref() == Some(message.aggregate_id.as_str())
            && checkpoint.last_processed_version >= message.event_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: i64, version: i64) -> OutboxMessage {
        OutboxMessage {
            id,
            aggregate_id: "w1".to_string(),
            event_type: "WalletCredited".to_string(),
            event_version: version,
            payload: serde_json::json!({}),
            correlation_id: None,
            causation_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn already_processed_by_id_guard() {
        let checkpoint = Checkpoint {
            last_processed_id: 5,
            last_processed_version: 0,
            aggregate_id: None,
            metadata: None,
        };
        assert!(default_is_already_processed(&checkpoint, &message(5, 1)));
        assert!(default_is_already_processed(&checkpoint, &message(3, 1)));
        assert!(!default_is_already_processed(&checkpoint, &message(6, 1)));
    }

    #[test]
    fn already_processed_by_secondary_aggregate_version_guard() {
        let checkpoint = Checkpoint {
            last_processed_id: 2,
            last_processed_version: 4,
            aggregate_id: Some("w1".to_string()),
            metadata: None,
        };
        // Same aggregate, version already covered, even though the id guard
        // alone would not catch it.
        assert!(default_is_already_processed(&checkpoint, &message(10, 4)));
        // Different aggregate: secondary guard does not apply.
        let mut other = message(10, 4);
        other.aggregate_id = "w2".to_string();
        assert!(!default_is_already_processed(&checkpoint, &other));
    }
}
