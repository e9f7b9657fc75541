//! Transfer handler
//!
//! Moves funds between two wallets as a debit on the source and a credit on
//! the destination. Locks are acquired in lexicographic order of the two
//! wallet ids regardless of transfer direction, so two transfers touching
//! the same pair of wallets from opposite directions can never deadlock.

use sqlx::PgPool;

use crate::aggregate::wallet::WalletSnapshotState;
use crate::aggregate::Aggregate;
use crate::domain::{DomainError, MinorUnits, OperationContext};
use crate::error::AppError;
use crate::event_store::EventStore;
use crate::idempotency::IdempotencyCache;
use crate::lock::{ordered_keys, wallet_lock_key, DistributedLock};
use crate::outbox::Outbox;
use crate::snapshot::SnapshotStore;

use super::write_side::WriteSideWallets;
use super::{capture_failure, load_wallet, persist_event, TransferCommand, TransferResult};

pub struct TransferHandler {
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

impl TransferHandler {
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
        command: TransferCommand,
        idempotency_key: Option<String>,
        context: &OperationContext,
    ) -> Result<TransferResult, AppError> {
        if command.from_wallet_id == command.to_wallet_id {
            return Err(DomainError::SameWalletTransfer.into());
        }

        if let Some(key) = &idempotency_key {
            let request_hash = IdempotencyCache::compute_request_hash(
                &serde_json::to_value(&command).map_err(|e| AppError::Internal(e.to_string()))?,
            );
            if let Some(cached) = self.idempotency.try_get(key, &request_hash).await? {
                return serde_json::from_value(cached).map_err(|e| AppError::Internal(e.to_string()));
            }
        }

        let keys = ordered_keys(vec![
            wallet_lock_key(&command.from_wallet_id),
            wallet_lock_key(&command.to_wallet_id),
        ]);

        let outcome = self
            .lock
            .with_lock(&keys[0], self.lock_ttl, self.lock_max_retries, || {
                self.with_second_lock(&keys[1], &command, idempotency_key.as_deref(), context)
            })
            .await;

        match &outcome {
            Ok(result) => {
                if let Some(key) = &idempotency_key {
                    let response = serde_json::to_value(result)
                        .map_err(|e| AppError::Internal(e.to_string()))?;
                    self.idempotency.store(key, &response).await?;
                }
            }
            Err(AppError::TransferPartiallyFailed { .. }) => {
                // A partial failure is not retryable with the same key — leave the
                // idempotency record PENDING so recovery's drift detection, not a
                // client retry, resolves the imbalance.
            }
            Err(_) => {
                if let Some(key) = &idempotency_key {
                    self.idempotency.mark_failed(key).await?;
                }
            }
        }

        outcome
    }

    async fn with_second_lock(
        &self,
        second_key: &str,
        command: &TransferCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<TransferResult, AppError> {
        self.lock
            .with_lock(second_key, self.lock_ttl, self.lock_max_retries, || {
                self.transfer_under_locks(command, idempotency_key, context)
            })
            .await
    }

    async fn transfer_under_locks(
        &self,
        command: &TransferCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<TransferResult, AppError> {
        if let Some(key) = idempotency_key {
            let request_hash = IdempotencyCache::compute_request_hash(
                &serde_json::to_value(command).map_err(|e| AppError::Internal(e.to_string()))?,
            );
            self.idempotency.store_pending(key, &request_hash).await?;
        }

        let amount =
            MinorUnits::new(command.amount).map_err(|e| AppError::InvalidAmount(e.to_string()))?;

        let from_wallet = load_wallet(&self.event_store, &self.snapshots, &command.from_wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(command.from_wallet_id.clone()))?;
        let to_wallet = load_wallet(&self.event_store, &self.snapshots, &command.to_wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(command.to_wallet_id.clone()))?;

        let debit_event = from_wallet.debit(&amount, command.description.clone())?;
        let from_version_before = from_wallet.version();

        let (from_wallet, from_stored) = persist_event(
            &self.event_store,
            from_wallet,
            debit_event,
            from_version_before,
            context,
        )
        .await?;

        let debit_event_id = from_stored
            .first()
            .map(|e| e.id)
            .ok_or_else(|| AppError::Internal("debit leg produced no stored event".to_string()))?;

        let credit_event = match to_wallet.credit(&amount, command.description.clone()) {
            Ok(event) => event,
            Err(_) => return Err(AppError::TransferPartiallyFailed { debit_event_id }),
        };
        let to_version_before = to_wallet.version();

        let (to_wallet, to_stored) = match persist_event(
            &self.event_store,
            to_wallet,
            credit_event,
            to_version_before,
            context,
        )
        .await
        {
            Ok(result) => result,
            Err(_) => return Err(AppError::TransferPartiallyFailed { debit_event_id }),
        };

        if let Err(e) = self
            .write_side
            .apply_delta(&command.from_wallet_id, -command.amount, from_wallet.version())
            .await
        {
            tracing::warn!(wallet_id = %command.from_wallet_id, error = %e, "write-side mirror debit failed");
            capture_failure(&self.debug_capture_dir, "write_side_debit", &command.from_wallet_id, &e.to_string()).await;
        }
        if let Err(e) = self
            .write_side
            .apply_delta(&command.to_wallet_id, command.amount, to_wallet.version())
            .await
        {
            tracing::warn!(wallet_id = %command.to_wallet_id, error = %e, "write-side mirror credit failed");
            capture_failure(&self.debug_capture_dir, "write_side_credit", &command.to_wallet_id, &e.to_string()).await;
        }

        if let Err(e) = self.outbox.enqueue(&from_stored, context).await {
            tracing::warn!(wallet_id = %command.from_wallet_id, error = %e, "outbox enqueue failed");
            capture_failure(&self.debug_capture_dir, "outbox_enqueue", &command.from_wallet_id, &e.to_string()).await;
        }
        if let Err(e) = self.outbox.enqueue(&to_stored, context).await {
            tracing::warn!(wallet_id = %command.to_wallet_id, error = %e, "outbox enqueue failed");
            capture_failure(&self.debug_capture_dir, "outbox_enqueue", &command.to_wallet_id, &e.to_string()).await;
        }

        self.maybe_snapshot(&from_wallet, &command.from_wallet_id).await;
        self.maybe_snapshot(&to_wallet, &command.to_wallet_id).await;

        let from_wallet = from_wallet.mark_events_committed();
        let to_wallet = to_wallet.mark_events_committed();

        Ok(TransferResult {
            from: from_wallet.snapshot_view(),
            to: to_wallet.snapshot_view(),
        })
    }

    async fn maybe_snapshot(
        &self,
        wallet: &crate::aggregate::wallet::Wallet,
        wallet_id: &str,
    ) {
        let total_events = match self.event_store.event_count(wallet_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(wallet_id, error = %e, "failed to read event count for snapshot gate");
                return;
            }
        };
        if self.snapshot_threshold > 0 && total_events % self.snapshot_threshold == 0 {
            if let Err(e) = self.snapshots.save_snapshot(wallet).await {
                tracing::warn!(wallet_id, error = %e, "snapshot save failed");
            }
        }
    }
}
