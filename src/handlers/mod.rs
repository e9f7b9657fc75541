//! Command Handlers module
//!
//! Orchestrates the event log, distributed lock, snapshot store, outbox and
//! idempotency cache to execute each mutating wallet command. Every handler
//! follows the same shape: idempotency check, acquire lock(s), load
//! aggregate, make a domain decision, append, best-effort mirror/enqueue,
//! cache the result.

mod commands;
mod create_handler;
mod credit_handler;
mod debit_handler;
mod transfer_handler;
mod write_side;

#[cfg(test)]
mod tests;

pub use commands::*;
pub use create_handler::CreateWalletHandler;
pub use credit_handler::CreditWalletHandler;
pub use debit_handler::DebitWalletHandler;
pub use transfer_handler::TransferHandler;

use crate::aggregate::wallet::Wallet;
use crate::aggregate::Aggregate;
use crate::domain::OperationContext;
use crate::domain::StoredEvent;
use crate::domain::WalletEvent;
use crate::error::AppError;
use crate::event_store::{EventStore, EventStoreError, PendingEvent, StreamId};
use crate::snapshot::SnapshotStore;

/// Load a wallet via its latest snapshot plus the tail of events after it,
/// falling back to a full replay when no snapshot exists yet.
async fn load_wallet(
    event_store: &EventStore,
    snapshots: &SnapshotStore,
    wallet_id: &str,
) -> Result<Option<Wallet>, AppError> {
    match snapshots.get_latest_snapshot::<Wallet>(wallet_id).await? {
        Some(snapshot) => {
            let tail = event_store
                .load_aggregate_from(wallet_id, snapshot.version())
                .await?;
            let events = tail
                .into_iter()
                .map(|stored| deserialize_event(stored))
                .collect::<Result<Vec<_>, _>>()?;
            let mut wallet = snapshot;
            for event in events {
                wallet = wallet.apply(event);
            }
            Ok(Some(wallet))
        }
        None => event_store
            .load_aggregate::<Wallet>(wallet_id)
            .await
            .map_err(AppError::from),
    }
}

fn deserialize_event(stored: StoredEvent) -> Result<WalletEvent, AppError> {
    serde_json::from_value(stored.event_data).map_err(|e| AppError::Internal(e.to_string()))
}

/// Append a single domain event to a wallet's stream and fold it back onto
/// the in-memory aggregate. Returns the updated wallet and the stored rows
/// (always length 1) for outbox enqueueing.
async fn persist_event(
    event_store: &EventStore,
    wallet: Wallet,
    event: WalletEvent,
    expected_version: i64,
    context: &OperationContext,
) -> Result<(Wallet, Vec<StoredEvent>), AppError> {
    let stream = StreamId {
        aggregate_type: Wallet::aggregate_type(),
        aggregate_id: wallet.id(),
    };
    let pending = vec![
        PendingEvent::new(event.event_type(), &event).map_err(|e| AppError::Internal(e.to_string()))?,
    ];

    let stored = match event_store
        .append_to_stream(&stream, pending, expected_version, context)
        .await
    {
        Ok(stored) => stored,
        Err(EventStoreError::ConcurrencyConflict { .. }) => {
            return Err(AppError::ConcurrencyConflict)
        }
        Err(e) => return Err(e.into()),
    };

    let wallet = wallet.stage(event).mark_events_committed();
    Ok((wallet, stored))
}

/// Best-effort failure capture: appends a JSONL line for offline triage.
/// Never itself allowed to fail the calling handler.
async fn capture_failure(dir: &str, kind: &str, wallet_id: &str, detail: &str) {
    let dir = dir.to_string();
    let kind = kind.to_string();
    let wallet_id = wallet_id.to_string();
    let detail = detail.to_string();

    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use std::io::Write;

        std::fs::create_dir_all(&dir)?;
        let path = std::path::Path::new(&dir).join("handler-failures.jsonl");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let line = serde_json::json!({
            "kind": kind,
            "wallet_id": wallet_id,
            "detail": detail,
            "captured_at": chrono::Utc::now().to_rfc3339(),
        });
        writeln!(file, "{line}")
    })
    .await;

    match result {
        Err(e) => tracing::warn!(error = %e, "debug capture task panicked"),
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to write debug capture file"),
        Ok(Ok(())) => {}
    }
}
