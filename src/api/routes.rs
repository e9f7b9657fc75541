//! API Routes
//!
//! HTTP endpoint definitions for the wallet ledger.

use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

use crate::aggregate::wallet::WalletSnapshotState;
use crate::domain::OperationContext;
use crate::error::AppError;
use crate::handlers::{
    CreateWalletCommand, CreateWalletHandler, CreditCommand, CreditWalletHandler, DebitCommand,
    DebitWalletHandler, TransferCommand, TransferHandler, TransferResult,
};
use crate::idempotency::IdempotencyCache;
use crate::lock::DistributedLock;

/// Shared state for the wallet ledger's HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub lock: DistributedLock,
    pub lock_ttl: std::time::Duration,
    pub lock_max_retries: u32,
    pub idempotency: IdempotencyCache,
    pub snapshot_threshold: i64,
    pub debug_capture_dir: String,
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub wallet_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub initial_balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_wallet_id: String,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub from_wallet: WalletSnapshotState,
    pub to_wallet: WalletSnapshotState,
}

impl From<TransferResult> for TransferResponse {
    fn from(result: TransferResult) -> Self {
        Self {
            from_wallet: result.from,
            to_wallet: result.to,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WalletListEntry {
    pub id: String,
    pub owner_id: String,
    pub balance: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct WalletListResponse {
    pub wallets: Vec<WalletListEntry>,
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

// =========================================================================
// Router
// =========================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/wallets", post(create_wallet))
        .route("/wallets", get(list_wallets))
        .route("/wallets/:id", get(get_wallet))
        .route("/wallets/:id/credit", post(credit_wallet))
        .route("/wallets/:id/debit", post(debit_wallet))
        .route("/wallets/:id/transfer", post(transfer_wallet))
}

// =========================================================================
// POST /wallets
// =========================================================================

async fn create_wallet(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(request): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<WalletSnapshotState>), AppError> {
    let handler = CreateWalletHandler::new(
        state.pool,
        state.lock,
        state.idempotency,
        state.lock_ttl,
        state.lock_max_retries,
        state.debug_capture_dir,
    );

    let command = CreateWalletCommand {
        wallet_id: request.wallet_id,
        owner_id: request.owner_id,
        initial_balance: request.initial_balance,
    };

    let snapshot = handler
        .execute(command, idempotency_key(&headers), &context)
        .await?;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

// =========================================================================
// POST /wallets/:id/credit
// =========================================================================

async fn credit_wallet(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(wallet_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreditRequest>,
) -> Result<Json<WalletSnapshotState>, AppError> {
    let handler = CreditWalletHandler::new(
        state.pool,
        state.lock,
        state.idempotency,
        state.lock_ttl,
        state.lock_max_retries,
        state.snapshot_threshold,
        state.debug_capture_dir,
    );

    let command = CreditCommand {
        wallet_id,
        amount: request.amount,
        description: request.description,
    };

    let snapshot = handler
        .execute(command, idempotency_key(&headers), &context)
        .await?;

    Ok(Json(snapshot))
}

// =========================================================================
// POST /wallets/:id/debit
// =========================================================================

async fn debit_wallet(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(wallet_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<DebitRequest>,
) -> Result<Json<WalletSnapshotState>, AppError> {
    let handler = DebitWalletHandler::new(
        state.pool,
        state.lock,
        state.idempotency,
        state.lock_ttl,
        state.lock_max_retries,
        state.snapshot_threshold,
        state.debug_capture_dir,
    );

    let command = DebitCommand {
        wallet_id,
        amount: request.amount,
        description: request.description,
    };

    let snapshot = handler
        .execute(command, idempotency_key(&headers), &context)
        .await?;

    Ok(Json(snapshot))
}

// =========================================================================
// POST /wallets/:id/transfer
// =========================================================================

async fn transfer_wallet(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(wallet_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, AppError> {
    let handler = TransferHandler::new(
        state.pool,
        state.lock,
        state.idempotency,
        state.lock_ttl,
        state.lock_max_retries,
        state.snapshot_threshold,
        state.debug_capture_dir,
    );

    let command = TransferCommand {
        from_wallet_id: wallet_id,
        to_wallet_id: request.to_wallet_id,
        amount: request.amount,
        description: request.description,
    };

    let result = handler
        .execute(command, idempotency_key(&headers), &context)
        .await?;

    Ok(Json(result.into()))
}

// =========================================================================
// GET /wallets/:id
// =========================================================================

async fn get_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<WalletListEntry>, AppError> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_id, balance, version, created_at, updated_at
        FROM wallets
        WHERE id = $1
        "#,
    )
    .bind(&wallet_id)
    .fetch_optional(&state.pool)
    .await?;

    let row = row.ok_or_else(|| AppError::WalletNotFound(wallet_id.clone()))?;

    Ok(Json(WalletListEntry {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        balance: row.try_get("balance")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

// =========================================================================
// GET /wallets
// =========================================================================

async fn list_wallets(
    State(state): State<AppState>,
) -> Result<Json<WalletListResponse>, AppError> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner_id, balance, version, created_at, updated_at
        FROM wallets
        ORDER BY created_at DESC
        LIMIT 500
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let wallets = rows
        .into_iter()
        .map(|row| {
            Ok(WalletListEntry {
                id: row.try_get("id")?,
                owner_id: row.try_get("owner_id")?,
                balance: row.try_get("balance")?,
                version: row.try_get("version")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Json(WalletListResponse { wallets }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_wallet_request_deserialize() {
        let json = r#"{"wallet_id": "w1", "owner_id": "u1", "initial_balance": 10000}"#;
        let request: CreateWalletRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.wallet_id, "w1");
        assert_eq!(request.initial_balance, 10000);
    }

    #[test]
    fn test_create_wallet_request_defaults_balance_to_zero() {
        let json = r#"{"wallet_id": "w1", "owner_id": "u1"}"#;
        let request: CreateWalletRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.initial_balance, 0);
    }

    #[test]
    fn test_transfer_request_deserialize() {
        let json = r#"{"to_wallet_id": "w2", "amount": 500, "description": "rent"}"#;
        let request: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.to_wallet_id, "w2");
        assert_eq!(request.amount, 500);
        assert_eq!(request.description, Some("rent".to_string()));
    }
}
