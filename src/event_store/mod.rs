//! Event store module
//!
//! Persistence layer for event sourcing. Handles storing and retrieving
//! per-aggregate event streams from PostgreSQL.

mod error;
mod repository;

pub use error::EventStoreError;
pub use repository::{
    new_correlation_id, EventStore, PendingEvent, StreamId, EXPECTED_NO_STREAM,
};
