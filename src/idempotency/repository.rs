//! Idempotency repository
//!
//! Deduplicates client-supplied command keys by key + request-hash, with a
//! TTL. A key transitions `PENDING -> COMPLETED` on success or
//! `PENDING -> FAILED` on failure, so a client that retries after a failure
//! is allowed to try again with the same key.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Default TTL for an idempotency record, in hours.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// How long a PENDING record may sit before it is considered abandoned and
/// reclaimable by a fresh attempt.
const STALE_PENDING_WINDOW: ChronoDuration = ChronoDuration::minutes(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

impl From<String> for IdempotencyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => IdempotencyStatus::Completed,
            "failed" => IdempotencyStatus::Failed,
            _ => IdempotencyStatus::Pending,
        }
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdempotencyStatus::Pending => write!(f, "pending"),
            IdempotencyStatus::Completed => write!(f, "completed"),
            IdempotencyStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub response: Option<serde_json::Value>,
    pub status: IdempotencyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("a request with key {0} is already being processed")]
    ConflictInProgress(String),

    #[error("key {0} was reused with a different request payload")]
    IdempotencyKeyReuse(String),
}

/// Repository for managing idempotency keys.
#[derive(Debug, Clone)]
pub struct IdempotencyCache {
    pool: PgPool,
    ttl_hours: i64,
}

impl IdempotencyCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ttl_hours: DEFAULT_TTL_HOURS,
        }
    }

    pub fn with_ttl_hours(mut self, ttl_hours: i64) -> Self {
        self.ttl_hours = ttl_hours;
        self
    }

    /// Look up a key. Returns the cached response on a completed hit, or
    /// `None` on a clean miss (no record, expired record, or a reclaimed
    /// stale PENDING/FAILED record).
    pub async fn try_get(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Result<Option<serde_json::Value>, IdempotencyError> {
        let Some(record) = self.get(key).await? else {
            return Ok(None);
        };

        if record.expires_at < Utc::now() {
            sqlx::query("DELETE FROM idempotency_keys WHERE key = $1")
                .bind(key)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        if record.request_hash != request_hash {
            return Err(IdempotencyError::IdempotencyKeyReuse(key.to_string()));
        }

        match record.status {
            IdempotencyStatus::Completed => Ok(record.response),
            IdempotencyStatus::Pending => {
                if Utc::now() - record.created_at < STALE_PENDING_WINDOW {
                    Err(IdempotencyError::ConflictInProgress(key.to_string()))
                } else {
                    Ok(None)
                }
            }
            IdempotencyStatus::Failed => Ok(None),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let row: Option<(String, String, Option<serde_json::Value>, String, DateTime<Utc>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT key, request_hash, response, status, created_at, expires_at
                FROM idempotency_keys
                WHERE key = $1
                "#,
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(key, request_hash, response, status, created_at, expires_at)| {
            IdempotencyRecord {
                key,
                request_hash,
                response,
                status: IdempotencyStatus::from(status),
                created_at,
                expires_at,
            }
        }))
    }

    /// Insert a PENDING record before starting work under the lock, or
    /// reclaim one left behind by a completed, failed, or stale-PENDING
    /// attempt. Only a still-fresh PENDING row blocks the caller.
    pub async fn store_pending(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Result<(), IdempotencyError> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::hours(self.ttl_hours);
        let stale_before = now - STALE_PENDING_WINDOW;

        let row: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO idempotency_keys (key, request_hash, status, response, created_at, expires_at)
            VALUES ($1, $2, 'pending', NULL, $3, $4)
            ON CONFLICT (key) DO UPDATE
            SET request_hash = EXCLUDED.request_hash,
                status = 'pending',
                response = NULL,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.status != 'pending'
               OR idempotency_keys.created_at < $5
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(now)
        .bind(expires_at)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            return Err(IdempotencyError::ConflictInProgress(key.to_string()));
        }

        Ok(())
    }

    /// Mark a key completed with the response to cache.
    pub async fn store(
        &self,
        key: &str,
        response: &serde_json::Value,
    ) -> Result<(), IdempotencyError> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET status = 'completed', response = $2
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(response)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flip a key to FAILED so the client may retry with the same key.
    pub async fn mark_failed(&self, key: &str) -> Result<(), IdempotencyError> {
        sqlx::query("UPDATE idempotency_keys SET status = 'failed' WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete expired records.
    pub async fn cleanup(&self) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows)
    }

    /// Stable SHA-256 over canonical JSON (object keys sorted) of a request
    /// payload.
    pub fn compute_request_hash(payload: &serde_json::Value) -> String {
        use sha2::{Digest, Sha256};

        let canonical = canonicalize(payload);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Render a JSON value deterministically, with object keys sorted.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        serde_json::Value::Array(items) => {
            let body = items.iter().map(canonicalize).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_status_from_string() {
        assert_eq!(
            IdempotencyStatus::from("pending".to_string()),
            IdempotencyStatus::Pending
        );
        assert_eq!(
            IdempotencyStatus::from("completed".to_string()),
            IdempotencyStatus::Completed
        );
        assert_eq!(
            IdempotencyStatus::from("failed".to_string()),
            IdempotencyStatus::Failed
        );
        assert_eq!(
            IdempotencyStatus::from("unknown".to_string()),
            IdempotencyStatus::Pending
        );
    }

    #[test]
    fn canonical_hash_is_stable_under_key_reorder() {
        let a = serde_json::json!({"amount": 100, "to": "w2"});
        let b = serde_json::json!({"to": "w2", "amount": 100});

        assert_eq!(
            IdempotencyCache::compute_request_hash(&a),
            IdempotencyCache::compute_request_hash(&b)
        );
    }

    #[test]
    fn canonical_hash_differs_on_value_change() {
        let a = serde_json::json!({"amount": 100});
        let b = serde_json::json!({"amount": 200});

        assert_ne!(
            IdempotencyCache::compute_request_hash(&a),
            IdempotencyCache::compute_request_hash(&b)
        );
    }

    #[test]
    fn idempotency_error_display() {
        let err = IdempotencyError::ConflictInProgress("k1".to_string());
        assert!(err.to_string().contains("being processed"));

        let err = IdempotencyError::IdempotencyKeyReuse("k1".to_string());
        assert!(err.to_string().contains("reused"));
    }
}
