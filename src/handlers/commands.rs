//! Command definitions
//!
//! Commands represent intentions to change wallet state. Amounts travel as
//! raw minor units; validation into [`crate::domain::MinorUnits`] /
//! [`crate::domain::Balance`] happens inside each handler so invalid input
//! never reaches the aggregate.

use serde::{Deserialize, Serialize};

use crate::aggregate::wallet::WalletSnapshotState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWalletCommand {
    pub wallet_id: String,
    pub owner_id: String,
    pub initial_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditCommand {
    pub wallet_id: String,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitCommand {
    pub wallet_id: String,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub amount: i64,
    pub description: Option<String>,
}

/// Result of a successful transfer: both legs' post-commit snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub from: WalletSnapshotState,
    pub to: WalletSnapshotState,
}
