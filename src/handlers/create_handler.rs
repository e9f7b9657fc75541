//! Create wallet handler

use sqlx::PgPool;

use crate::aggregate::wallet::{Wallet, WalletSnapshotState};
use crate::aggregate::Aggregate;
use crate::domain::{Balance, DomainError, OperationContext};
use crate::error::AppError;
use crate::event_store::{EventStore, PendingEvent, StreamId, EXPECTED_NO_STREAM};
use crate::idempotency::IdempotencyCache;
use crate::lock::{wallet_lock_key, DistributedLock};
use crate::outbox::Outbox;

use super::write_side::WriteSideWallets;
use super::{capture_failure, CreateWalletCommand};

pub struct CreateWalletHandler {
    event_store: EventStore,
    outbox: Outbox,
    write_side: WriteSideWallets,
    idempotency: IdempotencyCache,
    lock: DistributedLock,
    lock_ttl: std::time::Duration,
    lock_max_retries: u32,
    debug_capture_dir: String,
}

impl CreateWalletHandler {
    pub fn new(
        pool: PgPool,
        lock: DistributedLock,
        idempotency: IdempotencyCache,
        lock_ttl: std::time::Duration,
        lock_max_retries: u32,
        debug_capture_dir: String,
    ) -> Self {
        Self {
            event_store: EventStore::new(pool.clone()),
            outbox: Outbox::new(pool.clone()),
            write_side: WriteSideWallets::new(pool),
            idempotency,
            lock,
            lock_ttl,
            lock_max_retries,
            debug_capture_dir,
        }
    }

    pub async fn execute(
        &self,
        command: CreateWalletCommand,
        idempotency_key: Option<String>,
        context: &OperationContext,
    ) -> Result<WalletSnapshotState, AppError> {
        if let Some(key) = &idempotency_key {
            let request_hash = IdempotencyCache::compute_request_hash(
                &serde_json::to_value(&command).map_err(|e| AppError::Internal(e.to_string()))?,
            );
            if let Some(cached) = self.idempotency.try_get(key, &request_hash).await? {
                tracing::info!(key, "idempotency hit, returning cached response");
                return serde_json::from_value(cached).map_err(|e| AppError::Internal(e.to_string()));
            }
        }

        let key = wallet_lock_key(&command.wallet_id);
        let outcome: Result<WalletSnapshotState, AppError> = self
            .lock
            .with_lock(&key, self.lock_ttl, self.lock_max_retries, || {
                self.create_under_lock(&command, idempotency_key.as_deref(), context)
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

    async fn create_under_lock(
        &self,
        command: &CreateWalletCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<WalletSnapshotState, AppError> {
        let existing = self.event_store.read_stream(&command.wallet_id).await?;
        if !existing.is_empty() {
            return Err(DomainError::WalletAlreadyExists(command.wallet_id.clone()).into());
        }
        if self.write_side.exists(&command.wallet_id).await? {
            return Err(DomainError::WalletAlreadyExists(command.wallet_id.clone()).into());
        }

        if let Some(key) = idempotency_key {
            let request_hash = IdempotencyCache::compute_request_hash(
                &serde_json::to_value(command).map_err(|e| AppError::Internal(e.to_string()))?,
            );
            self.idempotency.store_pending(key, &request_hash).await?;
        }

        let initial_balance = Balance::new(command.initial_balance)
            .map_err(|e| AppError::InvalidAmount(e.to_string()))?;

        let (wallet, event) =
            Wallet::create(&command.wallet_id, &command.owner_id, initial_balance);

        let stream = StreamId {
            aggregate_type: Wallet::aggregate_type(),
            aggregate_id: command.wallet_id.clone(),
        };
        let pending = vec![PendingEvent::new(event.event_type(), &event)
            .map_err(|e| AppError::Internal(e.to_string()))?];

        let stored = self
            .event_store
            .append_to_stream(&stream, pending, EXPECTED_NO_STREAM, context)
            .await?;

        if let Err(e) = self
            .write_side
            .create(&command.wallet_id, &command.owner_id, command.initial_balance)
            .await
        {
            tracing::warn!(wallet_id = %command.wallet_id, error = %e, "write-side mirror create failed");
            capture_failure(&self.debug_capture_dir, "write_side_create", &command.wallet_id, &e.to_string()).await;
        }

        if let Err(e) = self.outbox.enqueue(&stored, context).await {
            tracing::warn!(wallet_id = %command.wallet_id, error = %e, "outbox enqueue failed");
            capture_failure(&self.debug_capture_dir, "outbox_enqueue", &command.wallet_id, &e.to_string()).await;
        }

        let wallet = wallet.mark_events_committed();
        Ok(wallet.snapshot_view())
    }
}
