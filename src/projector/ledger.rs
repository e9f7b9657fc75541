//! Ledger projector
//!
//! Appends one plain CREDIT/DEBIT entry per wallet event. Transfers are
//! represented as two independent ledger rows (one per leg) rather than an
//! inferred TRANSFER_IN/TRANSFER_OUT pairing — see the transfer-ledger
//! categorization decision in DESIGN.md.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{Projector, ProjectorError};
use crate::outbox::OutboxMessage;

pub struct LedgerProjector {
    pool: PgPool,
}

impl LedgerProjector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn latest_balance(&self, wallet_id: &str) -> Result<i64, ProjectorError> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT balance_after FROM ledger_entries
            WHERE wallet_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or(0))
    }
}

#[async_trait]
impl Projector for LedgerProjector {
    fn name(&self) -> &'static str {
        "ledger"
    }

    async fn apply(&self, message: &OutboxMessage) -> Result<(), ProjectorError> {
        let (transaction_type, amount): (&str, i64) = match message.event_type.as_str() {
            "WalletCreated" => {
                let initial_balance = message.payload["initial_balance"].as_i64().unwrap_or(0);
                if initial_balance == 0 {
                    return Ok(());
                }
                ("CREDIT", initial_balance)
            }
            "WalletCredited" => (
                "CREDIT",
                message.payload["amount"]
                    .as_i64()
                    .ok_or_else(|| ProjectorError::Apply("missing amount".to_string()))?,
            ),
            "WalletDebited" => (
                "DEBIT",
                message.payload["amount"]
                    .as_i64()
                    .ok_or_else(|| ProjectorError::Apply("missing amount".to_string()))?,
            ),
            other => {
                tracing::warn!(event_type = other, "ledger projector: unknown event type");
                return Ok(());
            }
        };

        let balance_before = self.latest_balance(&message.aggregate_id).await?;
        let balance_after = if transaction_type == "CREDIT" {
            balance_before + amount
        } else {
            balance_before - amount
        };

        let description = message.payload["description"].as_str();
        let reference_id = format!("outbox-{}", message.id);

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                wallet_id, transaction_type, amount, balance_before, balance_after,
                description, reference_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (reference_id) DO NOTHING
            "#,
        )
        .bind(&message.aggregate_id)
        .bind(transaction_type)
        .bind(amount)
        .bind(balance_before)
        .bind(balance_after)
        .bind(description)
        .bind(&reference_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(reference_id, "ledger entry already recorded, idempotent replay");
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
        let projector = LedgerProjector::new(pool);
        assert_eq!(projector.name(), "ledger");
    }
}
