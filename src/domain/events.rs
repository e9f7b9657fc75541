//! Domain events
//!
//! Event definitions for event sourcing. Events are immutable facts that
//! have happened to a wallet; once appended to a stream they are never
//! mutated or removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wallet-related events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WalletEvent {
    /// Wallet was created with an initial balance.
    WalletCreated {
        wallet_id: String,
        owner_id: String,
        initial_balance: i64,
        created_at: DateTime<Utc>,
    },

    /// The wallet balance was increased.
    WalletCredited {
        wallet_id: String,
        amount: i64,
        description: Option<String>,
        credited_at: DateTime<Utc>,
    },

    /// The wallet balance was decreased.
    WalletDebited {
        wallet_id: String,
        amount: i64,
        description: Option<String>,
        debited_at: DateTime<Utc>,
    },
}

impl WalletEvent {
    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::WalletCreated { .. } => "WalletCreated",
            WalletEvent::WalletCredited { .. } => "WalletCredited",
            WalletEvent::WalletDebited { .. } => "WalletDebited",
        }
    }

    /// Get the wallet id this event relates to.
    pub fn wallet_id(&self) -> &str {
        match self {
            WalletEvent::WalletCreated { wallet_id, .. } => wallet_id,
            WalletEvent::WalletCredited { wallet_id, .. } => wallet_id,
            WalletEvent::WalletDebited { wallet_id, .. } => wallet_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WalletEvent::WalletCreated { created_at, .. } => *created_at,
            WalletEvent::WalletCredited { credited_at, .. } => *credited_at,
            WalletEvent::WalletDebited { debited_at, .. } => *debited_at,
        }
    }
}

/// A generic domain event wrapper used for storage and outbox transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_event_serialization_round_trips() {
        let event = WalletEvent::WalletCredited {
            wallet_id: "w1".to_string(),
            amount: 100,
            description: Some("test credit".to_string()),
            credited_at: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("WalletCredited"));

        let deserialized: WalletEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.event_type(), deserialized.event_type());
        assert_eq!(event.wallet_id(), deserialized.wallet_id());
    }

    #[test]
    fn event_type_matches_variant() {
        let created = WalletEvent::WalletCreated {
            wallet_id: "w1".to_string(),
            owner_id: "u1".to_string(),
            initial_balance: 0,
            created_at: Utc::now(),
        };
        assert_eq!(created.event_type(), "WalletCreated");
    }
}
