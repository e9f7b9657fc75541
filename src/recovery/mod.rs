//! Recovery
//!
//! Periodic and on-demand repair routines that detect and close the gap
//! between the event log and its derived projections. Nothing here is part
//! of the write path — a wallet command never waits on recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use tokio::time::interval;

use crate::aggregate::wallet::Wallet;
use crate::aggregate::Aggregate;
use crate::domain::WalletEvent;
use crate::outbox::{Outbox, OutboxError};

const STALE_EVENT_WINDOW: ChronoDuration = ChronoDuration::minutes(5);
const DRIFT_TOLERANCE_MINOR_UNITS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RebuildReport {
    pub rebuilt: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DriftRecord {
    pub wallet_id: String,
    pub write_side_balance: Option<i64>,
    pub read_model_balance: Option<i64>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecoveryStats {
    pub stale_events: i64,
    pub oldest_stale_event_age_seconds: Option<i64>,
    pub unprocessed_events: i64,
}

pub struct RecoveryService {
    pool: PgPool,
    outbox: Outbox,
}

impl RecoveryService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            outbox: Outbox::new(pool.clone()),
            pool,
        }
    }

    /// Clear the consumer claim on outbox rows stuck unprocessed for longer
    /// than the stale window, so any consumer replica may reclaim them.
    pub async fn retry_stale_events(&self) -> Result<u64, RecoveryError> {
        let reset = self.outbox.reset_stale(STALE_EVENT_WINDOW).await?;
        if reset > 0 {
            tracing::warn!(count = reset, "reset stale outbox rows for reclaim");
        }
        Ok(reset)
    }

    /// Replay a single wallet's event stream from scratch into the `wallets`
    /// read-model row.
    pub async fn rebuild_wallet_read_model(&self, wallet_id: &str) -> Result<(), RecoveryError> {
        let rows = sqlx::query(
            r#"
            SELECT event_data FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        let mut wallet = Wallet::default();
        for row in rows {
            let data: serde_json::Value = row.try_get("event_data")?;
            let event: WalletEvent = serde_json::from_value(data)?;
            wallet = wallet.apply(event);
        }

        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, balance, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                balance = EXCLUDED.balance,
                version = EXCLUDED.version,
                updated_at = NOW()
            "#,
        )
        .bind(wallet_id)
        .bind(wallet.owner_id())
        .bind(wallet.balance().value())
        .bind(wallet.version())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rebuild the read model for every wallet known to the event log.
    pub async fn rebuild_all_read_models(&self) -> Result<RebuildReport, RecoveryError> {
        let wallet_ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT aggregate_id FROM events WHERE aggregate_type = 'Wallet'")
                .fetch_all(&self.pool)
                .await?;

        let mut report = RebuildReport::default();
        for wallet_id in wallet_ids {
            match self.rebuild_wallet_read_model(&wallet_id).await {
                Ok(()) => report.rebuilt += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(wallet_id, error = %e, "read-model rebuild failed");
                }
            }
        }
        Ok(report)
    }

    /// Compare write-side and read-model balances for every wallet, flagging
    /// drift beyond tolerance or outright absence from either side.
    pub async fn detect_data_drift(&self) -> Result<Vec<DriftRecord>, RecoveryError> {
        // The write-side mirror and the read-model projection share one
        // `wallets` row (the handler writes it best-effort, the projector
        // corrects it authoritatively), so there is nothing to self-join.
        // Drift means that row disagrees with the event log's own replay.
        let mut drifted = Vec::new();
        let wallet_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM wallets").fetch_all(&self.pool).await?;

        for wallet_id in wallet_ids {
            let events = sqlx::query(
                "SELECT event_data FROM events WHERE aggregate_id = $1 ORDER BY version ASC",
            )
            .bind(&wallet_id)
            .fetch_all(&self.pool)
            .await?;

            let mut wallet = Wallet::default();
            for row in &events {
                let data: serde_json::Value = row.try_get("event_data")?;
                let event: WalletEvent = serde_json::from_value(data)?;
                wallet = wallet.apply(event);
            }

            let read_balance: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM wallets WHERE id = $1")
                    .bind(&wallet_id)
                    .fetch_optional(&self.pool)
                    .await?;

            let truth = wallet.balance().value();
            let mismatched = match read_balance {
                Some(balance) => (balance - truth).abs() > DRIFT_TOLERANCE_MINOR_UNITS,
                None => true,
            };

            if mismatched {
                drifted.push(DriftRecord {
                    wallet_id,
                    write_side_balance: Some(truth),
                    read_model_balance: read_balance,
                });
            }
        }

        Ok(drifted)
    }

    /// Clear the consumer claim on every unprocessed outbox row, regardless
    /// of age. A blunter version of `retry_stale_events` for manual use.
    pub async fn force_reprocess_unprocessed(&self) -> Result<u64, RecoveryError> {
        let reset = self.outbox.reset_stale(ChronoDuration::zero()).await?;
        Ok(reset)
    }

    pub async fn get_stats(&self) -> Result<RecoveryStats, RecoveryError> {
        let stale_events: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM outbox
            WHERE processed_at IS NULL AND created_at < NOW() - INTERVAL '5 minutes'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MIN(created_at) FROM outbox
            WHERE processed_at IS NULL AND created_at < NOW() - INTERVAL '5 minutes'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let unprocessed_events = self.outbox.get_unprocessed_count(None).await?;

        Ok(RecoveryStats {
            stale_events,
            oldest_stale_event_age_seconds: oldest.map(|t| (Utc::now() - t).num_seconds()),
            unprocessed_events,
        })
    }
}

/// Drives [`RecoveryService`] on a fixed interval, skipping a tick if the
/// previous run is still in flight.
pub struct RecoveryScheduler {
    service: RecoveryService,
    interval: Duration,
    running: AtomicBool,
}

impl RecoveryScheduler {
    pub fn new(pool: PgPool, interval: Duration) -> Self {
        Self {
            service: RecoveryService::new(pool),
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("recovery scheduler started");
        let mut ticker = interval(self.interval);

        loop {
            ticker.tick().await;

            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::debug!("recovery tick skipped, previous run still in flight");
                continue;
            }

            if let Err(e) = self.service.retry_stale_events().await {
                tracing::error!(error = %e, "retry_stale_events failed");
            }

            match self.service.detect_data_drift().await {
                Ok(drifted) if !drifted.is_empty() => {
                    tracing::warn!(count = drifted.len(), "data drift detected");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "detect_data_drift failed"),
            }

            self.running.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_tolerance_is_one_minor_unit() {
        assert_eq!(DRIFT_TOLERANCE_MINOR_UNITS, 1);
    }
}
