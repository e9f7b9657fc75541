//! Distributed lock
//!
//! Per-aggregate mutual exclusion across processes, backed by Redis. A lock
//! is acquired with `SET key token NX PX ttl`, and released only if the
//! caller's token still matches (compare-and-delete via a Lua script), so a
//! lock whose holder crashed can never be released by a different holder
//! that later reclaimed it after expiry.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("lock acquisition timed out for {0}")]
    AcquisitionTimeout(String),
}

/// Token returned by a successful `acquire`, required to `release`.
#[derive(Debug, Clone)]
pub struct LockToken(String);

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed distributed lock client.
#[derive(Clone)]
pub struct DistributedLock {
    conn: ConnectionManager,
}

impl DistributedLock {
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Attempt to acquire `key` for `ttl`, returning a token on success.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|_| LockToken(token)))
    }

    /// Release `key`, but only if `token` still matches the current holder.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let released: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }

    /// Run `body` while holding `key`, retrying acquisition with exponential
    /// backoff and jitter up to `max_retries` times.
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        key: &str,
        ttl: Duration,
        max_retries: u32,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let token = self.acquire_with_retry(key, ttl, max_retries).await?;

        let result = body().await;

        if let Err(e) = self.release(key, &token).await {
            tracing::warn!(key, error = %e, "failed to release distributed lock");
        }

        result
    }

    async fn acquire_with_retry<E>(
        &self,
        key: &str,
        ttl: Duration,
        max_retries: u32,
    ) -> Result<LockToken, E>
    where
        E: From<LockError>,
    {
        let mut attempt: u32 = 0;
        loop {
            if let Some(token) = self.acquire(key, ttl).await.map_err(E::from)? {
                return Ok(token);
            }

            attempt += 1;
            if attempt >= max_retries {
                return Err(E::from(LockError::AcquisitionTimeout(key.to_string())));
            }

            let delay = backoff_delay(attempt);
            tokio::time::sleep(delay).await;
        }
    }
}

/// `min(initial * 1.5^attempt, 500ms)` plus uniform jitter in `[0, delay/2)`.
fn backoff_delay(attempt: u32) -> Duration {
    const INITIAL_MS: f64 = 5.0;
    const CAP_MS: f64 = 500.0;

    let exp = INITIAL_MS * 1.5f64.powi(attempt as i32);
    let base_ms = exp.min(CAP_MS);

    let jitter_ms = rand::thread_rng().gen_range(0.0..(base_ms / 2.0));
    Duration::from_millis((base_ms + jitter_ms) as u64)
}

/// Sort a set of keys into the total order used to avoid deadlock when a
/// single operation needs more than one lock (e.g. a transfer).
pub fn ordered_keys(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}

pub fn wallet_lock_key(wallet_id: &str) -> String {
    format!("lock:wallet:{wallet_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_capped() {
        for attempt in 0..50 {
            let delay = backoff_delay(attempt);
            assert!(delay.as_millis() <= 500 + 250);
        }
    }

    #[test]
    fn backoff_delay_grows_with_attempt() {
        assert!(backoff_delay(5) >= Duration::from_millis(5));
    }

    #[test]
    fn ordered_keys_sorts_lexicographically() {
        let keys = ordered_keys(vec!["w2".to_string(), "w1".to_string()]);
        assert_eq!(keys, vec!["w1".to_string(), "w2".to_string()]);
    }

    #[test]
    fn wallet_lock_key_format() {
        assert_eq!(wallet_lock_key("abc"), "lock:wallet:abc");
    }
}
