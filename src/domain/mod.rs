//! Domain module
//!
//! Core domain types and business logic.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;

pub use amount::{AmountError, Balance, MinorUnits};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{StoredEvent, WalletEvent};
