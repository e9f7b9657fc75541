//! Debit wallet handler

use sqlx::PgPool;

use crate::aggregate::wallet::WalletSnapshotState;
use crate::aggregate::Aggregate;
use crate::domain::{MinorUnits, OperationContext};
use crate::error::AppError;
use crate::event_store::EventStore;
use crate::idempotency::IdempotencyCache;
use crate::lock::{wallet_lock_key, DistributedLock};
use crate::outbox::Outbox;
use crate::snapshot::SnapshotStore;

use super::write_side::WriteSideWallets;
use super::{capture_failure, load_wallet, persist_event, DebitCommand};

pub struct DebitWalletHandler {
    event_store: EventStore,
    outbox: Outbox,
    snapshots: SnapshotStore,
    write_side: WriteSideWallets,
    idempotency: IdempotencyCache,
    lock: DistributedLock,
    lock_ttl: std::time::Duration,
    lock_max_retries: u32,
    snapshot_threshold: i64,
    debug_capture_dir: String,
}

impl DebitWalletHandler {
    pub fn new(
        pool: PgPool,
        lock: DistributedLock,
        idempotency: IdempotencyCache,
        lock_ttl: std::time::Duration,
        lock_max_retries: u32,
        snapshot_threshold: i64,
        debug_capture_dir: String,
    ) -> Self {
        Self {
            event_store: EventStore::new(pool.clone()),
            outbox: Outbox::new(pool.clone()),
            snapshots: SnapshotStore::new(pool.clone()),
            write_side: WriteSideWallets::new(pool),
            idempotency,
            lock,
            lock_ttl,
            lock_max_retries,
            snapshot_threshold,
            debug_capture_dir,
        }
    }

    pub async fn execute(
        &self,
        command: DebitCommand,
        idempotency_key: Option<String>,
        context: &OperationContext,
    ) -> Result<WalletSnapshotState, AppError> {
        if let Some(key) = &idempotency_key {
            let request_hash = IdempotencyCache::compute_request_hash(
                &serde_json::to_value(&command).map_err(|e| AppError::Internal(e.to_string()))?,
            );
            if let Some(cached) = self.idempotency.try_get(key, &request_hash).await? {
                return serde_json::from_value(cached).map_err(|e| AppError::Internal(e.to_string()));
            }
        }

        let key = wallet_lock_key(&command.wallet_id);
        let outcome = self
            .lock
            .with_lock(&key, self.lock_ttl, self.lock_max_retries, || {
                self.debit_under_lock(&command, idempotency_key.as_deref(), context)
            })
            .await;

        match &outcome {
            Ok(snapshot) => {
                if let Some(key) = &idempotency_key {
                    let response = serde_json::to_value(snapshot)
                        .map_err(|e| AppError::Internal(e.to_string()))?;
                    self.idempotency.store(key, &response).await?;
                }
            }
            Err(_) => {
                if let Some(key) = &idempotency_key {
                    self.idempotency.mark_failed(key).await?;
                }
            }
        }

        outcome
    }

    async fn debit_under_lock(
        &self,
        command: &DebitCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<WalletSnapshotState, AppError> {
        if let Some(key) = idempotency_key {
            let request_hash = IdempotencyCache::compute_request_hash(
                &serde_json::to_value(command).map_err(|e| AppError::Internal(e.to_string()))?,
            );
            self.idempotency.store_pending(key, &request_hash).await?;
        }

        let amount =
            MinorUnits::new(command.amount).map_err(|e| AppError::InvalidAmount(e.to_string()))?;

        let wallet = load_wallet(&self.event_store, &self.snapshots, &command.wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(command.wallet_id.clone()))?;

        let event = wallet.debit(&amount, command.description.clone())?;
        let wallet_version_before = wallet.version();

        let (wallet, stored) = persist_event(
            &self.event_store,
            wallet,
            event,
            wallet_version_before,
            context,
        )
        .await?;

        if let Err(e) = self
            .write_side
            .apply_delta(&command.wallet_id, -command.amount, wallet.version())
            .await
        {
            tracing::warn!(wallet_id = %command.wallet_id, error = %e, "write-side mirror debit failed");
            capture_failure(&self.debug_capture_dir, "write_side_debit", &command.wallet_id, &e.to_string()).await;
        }

        if let Err(e) = self.outbox.enqueue(&stored, context).await {
            tracing::warn!(wallet_id = %command.wallet_id, error = %e, "outbox enqueue failed");
            capture_failure(&self.debug_capture_dir, "outbox_enqueue", &command.wallet_id, &e.to_string()).await;
        }

        let total_events = self.event_store.event_count(&command.wallet_id).await?;
        if self.snapshot_threshold > 0 && total_events % self.snapshot_threshold == 0 {
            if let Err(e) = self.snapshots.save_snapshot(&wallet).await {
                tracing::warn!(wallet_id = %command.wallet_id, error = %e, "snapshot save failed");
            }
        }

        let wallet = wallet.mark_events_committed();
        Ok(wallet.snapshot_view())
    }
}
