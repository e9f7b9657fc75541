//! Integration tests for the event store

use chrono::Utc;
use uuid::Uuid;
use wallet_ledger::domain::{OperationContext, WalletEvent};
use wallet_ledger::event_store::{EventStore, PendingEvent, StreamId, EXPECTED_NO_STREAM};

mod common;

#[tokio::test]
async fn test_event_store_append_and_read_stream() {
    let pool = common::setup_test_db().await;
    let event_store = EventStore::new(pool);

    let wallet_id = format!("w-{}", Uuid::new_v4());
    let stream = StreamId {
        aggregate_type: "Wallet",
        aggregate_id: wallet_id.clone(),
    };

    let event = WalletEvent::WalletCreated {
        wallet_id: wallet_id.clone(),
        owner_id: "owner-1".to_string(),
        initial_balance: 0,
        created_at: Utc::now(),
    };
    let pending = PendingEvent::new("WalletCreated", &event).unwrap();

    let context = OperationContext::new().with_correlation_id(Uuid::new_v4());

    let stored = event_store
        .append_to_stream(&stream, vec![pending], EXPECTED_NO_STREAM, &context)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].version, 1);

    let events = event_store.read_stream(&wallet_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "WalletCreated");
    assert_eq!(events[0].version, 1);
}

#[tokio::test]
async fn test_event_store_concurrency_conflict() {
    let pool = common::setup_test_db().await;
    let event_store = EventStore::new(pool);

    let wallet_id = format!("w-{}", Uuid::new_v4());
    let stream = StreamId {
        aggregate_type: "Wallet",
        aggregate_id: wallet_id.clone(),
    };
    let context = OperationContext::new().with_correlation_id(Uuid::new_v4());

    let created = WalletEvent::WalletCreated {
        wallet_id: wallet_id.clone(),
        owner_id: "owner-1".to_string(),
        initial_balance: 10000,
        created_at: Utc::now(),
    };
    let pending = PendingEvent::new("WalletCreated", &created).unwrap();
    event_store
        .append_to_stream(&stream, vec![pending], EXPECTED_NO_STREAM, &context)
        .await
        .unwrap();

    // Retrying with the same expected_version (stream already at version 1) must fail.
    let credited = WalletEvent::WalletCredited {
        wallet_id: wallet_id.clone(),
        amount: 500,
        description: None,
        credited_at: Utc::now(),
    };
    let pending = PendingEvent::new("WalletCredited", &credited).unwrap();
    let result = event_store
        .append_to_stream(&stream, vec![pending], EXPECTED_NO_STREAM, &context)
        .await;

    assert!(result.is_err(), "should fail due to version conflict");
}

#[tokio::test]
async fn test_event_store_event_count_tracks_appends() {
    let pool = common::setup_test_db().await;
    let event_store = EventStore::new(pool);

    let wallet_id = format!("w-{}", Uuid::new_v4());
    let stream = StreamId {
        aggregate_type: "Wallet",
        aggregate_id: wallet_id.clone(),
    };
    let context = OperationContext::new().with_correlation_id(Uuid::new_v4());

    let created = WalletEvent::WalletCreated {
        wallet_id: wallet_id.clone(),
        owner_id: "owner-1".to_string(),
        initial_balance: 0,
        created_at: Utc::now(),
    };
    let pending = PendingEvent::new("WalletCreated", &created).unwrap();
    event_store
        .append_to_stream(&stream, vec![pending], EXPECTED_NO_STREAM, &context)
        .await
        .unwrap();

    let credited = WalletEvent::WalletCredited {
        wallet_id: wallet_id.clone(),
        amount: 2500,
        description: None,
        credited_at: Utc::now(),
    };
    let pending = PendingEvent::new("WalletCredited", &credited).unwrap();
    event_store
        .append_to_stream(&stream, vec![pending], 1, &context)
        .await
        .unwrap();

    let count = event_store.event_count(&wallet_id).await.unwrap();
    assert_eq!(count, 2);
}
