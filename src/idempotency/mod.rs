//! Idempotency module
//!
//! Prevents duplicate request processing using idempotency keys.

mod repository;

pub use repository::{
    IdempotencyCache, IdempotencyError, IdempotencyRecord, IdempotencyStatus, DEFAULT_TTL_HOURS,
};
