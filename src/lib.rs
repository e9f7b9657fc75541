//! wallet_ledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod aggregate;
pub mod api;
pub mod bus;
pub mod domain;
pub mod event_store;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod lock;
pub mod outbox;
pub mod projector;
pub mod recovery;
pub mod snapshot;

// Private modules (used only by main.rs binary)
pub mod config;
pub mod db;
mod error;

pub use api::AppState;
pub use config::Config;
pub use domain::{AmountError, Balance, DomainError, MinorUnits, OperationContext, StoredEvent, WalletEvent};
pub use error::{AppError, AppResult};
