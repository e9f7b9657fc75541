//! Wallet aggregate
//!
//! `Wallet` is the core aggregate for managing balances. It applies events
//! to maintain current state and generates events for commands; state is
//! derived from events, never directly mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::{Balance, MinorUnits, WalletEvent};

use super::Aggregate;

/// Wallet aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    id: String,
    owner_id: String,
    balance: Balance,
    version: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,

    /// Events produced by command methods but not yet appended to the log.
    #[serde(skip)]
    pending_events: Vec<WalletEvent>,
}

impl Default for Wallet {
    fn default() -> Self {
        Self {
            id: String::new(),
            owner_id: String::new(),
            balance: Balance::zero(),
            version: 0,
            created_at: None,
            updated_at: None,
            pending_events: Vec::new(),
        }
    }
}

impl Wallet {
    /// Create a new wallet and return it along with its creation event.
    pub fn create(
        wallet_id: impl Into<String>,
        owner_id: impl Into<String>,
        initial_balance: Balance,
    ) -> (Self, WalletEvent) {
        let now = Utc::now();
        let wallet_id = wallet_id.into();

        let event = WalletEvent::WalletCreated {
            wallet_id: wallet_id.clone(),
            owner_id: owner_id.into(),
            initial_balance: initial_balance.value(),
            created_at: now,
        };

        let mut wallet = Self::default();
        wallet.pending_events.push(event.clone());
        let wallet = wallet.apply(event.clone());

        (wallet, event)
    }

    /// Rehydrate a wallet from a full ordered event stream.
    pub fn rehydrate(events: impl IntoIterator<Item = WalletEvent>) -> Self {
        events.into_iter().fold(Self::default(), Wallet::apply)
    }

    /// Rehydrate from a snapshot plus the tail of events that followed it.
    pub fn rehydrate_from_snapshot(
        snapshot: WalletSnapshotState,
        tail_events: impl IntoIterator<Item = WalletEvent>,
    ) -> Self {
        let base = Self {
            id: snapshot.id,
            owner_id: snapshot.owner_id,
            balance: snapshot.balance,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            pending_events: Vec::new(),
        };
        tail_events.into_iter().fold(base, Wallet::apply)
    }

    /// Debit the wallet, returning the event to be persisted.
    pub fn debit(
        &self,
        amount: &MinorUnits,
        description: Option<String>,
    ) -> Result<WalletEvent, DomainError> {
        if !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_funds(
                amount.value(),
                self.balance.value(),
            ));
        }

        Ok(WalletEvent::WalletDebited {
            wallet_id: self.id.clone(),
            amount: amount.value(),
            description,
            debited_at: Utc::now(),
        })
    }

    /// Credit the wallet, returning the event to be persisted.
    pub fn credit(
        &self,
        amount: &MinorUnits,
        description: Option<String>,
    ) -> Result<WalletEvent, DomainError> {
        self.balance
            .credit(amount)
            .map_err(|e| DomainError::BusinessRuleViolation(e.to_string()))?;

        Ok(WalletEvent::WalletCredited {
            wallet_id: self.id.clone(),
            amount: amount.value(),
            description,
            credited_at: Utc::now(),
        })
    }

    /// Uncommitted events produced by command methods.
    pub fn pending_events(&self) -> &[WalletEvent] {
        &self.pending_events
    }

    /// Record a freshly produced event as pending (before it is appended).
    pub fn stage(mut self, event: WalletEvent) -> Self {
        self.pending_events.push(event.clone());
        self.apply(event)
    }

    /// Clear pending events once they have been durably appended.
    pub fn mark_events_committed(mut self) -> Self {
        self.pending_events.clear();
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn balance(&self) -> &Balance {
        &self.balance
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// A point-in-time view of the aggregate, suitable for returning to callers.
    pub fn snapshot_view(&self) -> WalletSnapshotState {
        WalletSnapshotState {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            balance: self.balance,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Plain data view of wallet state, used both as the snapshot payload and as
/// the shape returned to HTTP callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshotState {
    pub id: String,
    pub owner_id: String,
    pub balance: Balance,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Wallet {
    type Event = WalletEvent;

    fn aggregate_type() -> &'static str {
        "Wallet"
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            WalletEvent::WalletCreated {
                wallet_id,
                owner_id,
                initial_balance,
                created_at,
            } => {
                self.id = wallet_id;
                self.owner_id = owner_id;
                // Safe: initial_balance was validated when the event was created.
                self.balance = Balance::new(initial_balance).expect("invalid initial balance in event");
                self.created_at = Some(created_at);
                self.updated_at = Some(created_at);
            }

            WalletEvent::WalletCredited {
                amount,
                credited_at,
                ..
            } => {
                let amt = MinorUnits::new(amount).expect("invalid amount in event");
                self.balance = self.balance.credit(&amt).expect("balance overflow");
                self.updated_at = Some(credited_at);
            }

            WalletEvent::WalletDebited {
                amount,
                debited_at,
                ..
            } => {
                let amt = MinorUnits::new(amount).expect("invalid amount in event");
                self.balance = self.balance.debit(&amt).expect("balance underflow");
                self.updated_at = Some(debited_at);
            }
        }

        self.version += 1;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_produces_wallet_created_event() {
        let (wallet, event) = Wallet::create("w1", "u1", Balance::zero());

        assert_eq!(wallet.id(), "w1");
        assert_eq!(wallet.owner_id(), "u1");
        assert_eq!(wallet.balance().value(), 0);
        assert_eq!(wallet.version(), 1);
        assert!(matches!(event, WalletEvent::WalletCreated { .. }));
    }

    #[test]
    fn credit_then_debit() {
        let (wallet, _) = Wallet::create("w1", "u1", Balance::zero());

        let amount = MinorUnits::new(10000).unwrap();
        let event = wallet.credit(&amount, None).unwrap();
        assert!(matches!(event, WalletEvent::WalletCredited { .. }));
        let wallet = wallet.apply(event);
        assert_eq!(wallet.balance().value(), 10000);
        assert_eq!(wallet.version(), 2);

        let debit_amount = MinorUnits::new(3000).unwrap();
        let event = wallet.debit(&debit_amount, None).unwrap();
        let wallet = wallet.apply(event);
        assert_eq!(wallet.balance().value(), 7000);
        assert_eq!(wallet.version(), 3);
    }

    #[test]
    fn debit_rejects_overdraft() {
        let (wallet, _) = Wallet::create("w1", "u1", Balance::zero());

        let amount = MinorUnits::new(100).unwrap();
        let result = wallet.debit(&amount, None);

        assert!(matches!(result, Err(DomainError::InsufficientFunds { .. })));
    }

    #[test]
    fn rehydrate_from_events_matches_incremental_apply() {
        let (wallet, created) = Wallet::create("w1", "u1", Balance::zero());
        let credit = wallet.credit(&MinorUnits::new(500).unwrap(), None).unwrap();
        let wallet = wallet.apply(credit.clone());
        let debit = wallet.debit(&MinorUnits::new(200).unwrap(), None).unwrap();

        let rehydrated = Wallet::rehydrate(vec![created, credit, debit.clone()]);
        let applied = wallet.apply(debit);

        assert_eq!(rehydrated.balance().value(), applied.balance().value());
        assert_eq!(rehydrated.version(), applied.version());
    }

    #[test]
    fn should_snapshot_at_interval() {
        let (mut wallet, _) = Wallet::create("w1", "u1", Balance::zero());
        assert!(!wallet.should_snapshot());

        wallet.version = 100;
        assert!(wallet.should_snapshot());

        wallet.version = 99;
        assert!(!wallet.should_snapshot());
    }
}
