//! Common test utilities

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Setup test database - truncate tables for a clean slate.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE events, wallet_snapshots, outbox, outbox_consumer_processing, \
         projector_checkpoints, idempotency_keys, wallets, ledger_entries CASCADE",
    )
    .execute(&pool)
    .await
    .expect("failed to clean up DB");

    pool
}
