//! Write-side wallet mirror
//!
//! A denormalized copy of wallet state, written best-effort by command
//! handlers immediately after a successful append, and authoritatively
//! corrected later by the read-model projector. Used for the fast
//! `WalletAlreadyExists` pre-check and admin/report queries — never treated
//! as a source of truth.

use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct WriteSideWallets {
    pool: PgPool,
}

impl WriteSideWallets {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn exists(&self, wallet_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn create(
        &self,
        wallet_id: &str,
        owner_id: &str,
        initial_balance: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, balance, version, created_at, updated_at)
            VALUES ($1, $2, $3, 1, NOW(), NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(wallet_id)
        .bind(owner_id)
        .bind(initial_balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn apply_delta(
        &self,
        wallet_id: &str,
        delta: i64,
        new_version: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance + $2, version = $3, updated_at = NOW()
            WHERE id = $1 AND version < $3
            "#,
        )
        .bind(wallet_id)
        .bind(delta)
        .bind(new_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
