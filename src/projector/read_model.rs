//! Read-model projector
//!
//! Maintains a denormalized `wallets` row per aggregate for fast lookups
//! and the `GET /wallets` listing.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{Projector, ProjectorError};
use crate::outbox::OutboxMessage;

pub struct ReadModelProjector {
    pool: PgPool,
}

impl ReadModelProjector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Projector for ReadModelProjector {
    fn name(&self) -> &'static str {
        "read-model"
    }

    async fn apply(&self, message: &OutboxMessage) -> Result<(), ProjectorError> {
        match message.event_type.as_str() {
            "WalletCreated" => {
                let owner_id = message.payload["owner_id"]
                    .as_str()
                    .ok_or_else(|| ProjectorError::Apply("missing owner_id".to_string()))?;
                let initial_balance = message.payload["initial_balance"]
                    .as_i64()
                    .ok_or_else(|| ProjectorError::Apply("missing initial_balance".to_string()))?;

                sqlx::query(
                    r#"
                    INSERT INTO wallets (id, owner_id, balance, version, created_at, updated_at)
                    VALUES ($1, $2, $3, 1, NOW(), NOW())
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(&message.aggregate_id)
                .bind(owner_id)
                .bind(initial_balance)
                .execute(&self.pool)
                .await?;
            }
            "WalletCredited" | "WalletDebited" => {
                let amount = message.payload["amount"]
                    .as_i64()
                    .ok_or_else(|| ProjectorError::Apply("missing amount".to_string()))?;
                let delta = if message.event_type == "WalletCredited" {
                    amount
                } else {
                    -amount
                };

                let rows = sqlx::query(
                    r#"
                    UPDATE wallets
                    SET balance = balance + $2, version = $3, updated_at = NOW()
                    WHERE id = $1 AND version < $3
                    "#,
                )
                .bind(&message.aggregate_id)
                .bind(delta)
                .bind(message.event_version + 1)
                .execute(&self.pool)
                .await?
                .rows_affected();

                if rows == 0 {
                    tracing::warn!(
                        wallet_id = %message.aggregate_id,
                        "read-model projector: wallet missing or already at a newer version"
                    );
                }
            }
            other => {
                tracing::warn!(event_type = other, "read-model projector: unknown event type");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn projector_name_matches_checkpoint_consumer() {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let projector = ReadModelProjector::new(pool);
        assert_eq!(projector.name(), "read-model");
    }
}
