//! Route handlers for the trading, transfer, and account surface.
//!
//! Every route except `/health` sits behind the JWT middleware; `/admin/*`
//! additionally requires the admin role, checked against the verified
//! claims, never against anything client-supplied.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::{auth_middleware, Claims, JwtHandler};
use crate::error::CoreError;
use crate::ledger::{JournalEntry, LedgerStore};
use crate::sessions::{
    ExpirySweeper, NewSessionRequest, SessionOutcome, SessionReceipt, SessionStatus, SessionStore,
    SettlementEngine, TradeSession,
};
use crate::transfers::{ReceiverRef, TransferProcessor, TransferRequest};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerStore,
    pub sessions: SessionStore,
    pub engine: SettlementEngine,
    pub sweeper: ExpirySweeper,
    pub transfers: TransferProcessor,
}

/// Create the API router. Protected routes verify the bearer token before
/// any handler runs.
pub fn create_router(state: AppState, jwt_handler: Arc<JwtHandler>) -> Router {
    let protected = Router::new()
        .route("/trade/session", post(create_session).get(list_sessions))
        .route(
            "/admin/trade/session",
            post(admin_resolve).get(admin_list_pending),
        )
        .route("/transfers", post(create_transfer))
        .route("/account", get(get_account))
        .route("/account/journal", get(get_journal))
        .route_layer(middleware::from_fn_with_state(
            jwt_handler,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
}

// ===== Route Handlers =====

async fn health_check() -> &'static str {
    "BinBroker operational"
}

/// POST /trade/session — open a PENDING session, debiting the stake.
async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<SessionReceipt>, ApiError> {
    state.ledger.get_or_create(&claims.sub).await?;

    let receipt = state
        .engine
        .create_session(
            &claims.sub,
            NewSessionRequest {
                symbol: body.symbol,
                amount: body.amount,
                duration_secs: body.duration,
            },
        )
        .await?;

    Ok(Json(receipt))
}

/// GET /trade/session — the owner's sessions, expired ones swept first.
async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<TradeSession>>, ApiError> {
    state.ledger.get_or_create(&claims.sub).await?;
    state.sweeper.sweep_account(&claims.sub).await?;

    let sessions = state.sessions.list_for_account(&claims.sub, 100).await?;
    Ok(Json(sessions))
}

/// POST /admin/trade/session — force an outcome on a PENDING session.
async fn admin_resolve(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<AdminResolveBody>,
) -> Result<Json<AdminResolveResponse>, ApiError> {
    require_admin(&claims)?;

    let outcome = match body.action.to_uppercase().as_str() {
        "WIN" => SessionOutcome::Win,
        "LOSS" => SessionOutcome::Loss,
        other => {
            return Err(CoreError::Validation(format!(
                "unknown action {other:?}, expected WIN or LOSS"
            ))
            .into())
        }
    };

    let (session, new_price) = state.engine.admin_resolve(&body.session_id, outcome).await?;

    Ok(Json(AdminResolveResponse {
        status: session.status,
        new_price,
    }))
}

/// GET /admin/trade/session — every PENDING session, oldest first.
async fn admin_list_pending(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<TradeSession>>, ApiError> {
    require_admin(&claims)?;

    let pending = state.sessions.list_pending().await?;
    Ok(Json(pending))
}

/// POST /transfers — move balance to another account by id or alias.
async fn create_transfer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateTransferBody>,
) -> Result<Json<TransferResponse>, ApiError> {
    let to = match (body.to_user_id, body.to_unique_id) {
        (Some(id), _) => ReceiverRef::AccountId(id),
        (None, Some(alias)) => ReceiverRef::Alias(alias),
        (None, None) => {
            return Err(CoreError::Validation(
                "either toUserId or toUniqueId is required".to_string(),
            )
            .into())
        }
    };

    state.ledger.get_or_create(&claims.sub).await?;

    let receipt = state
        .transfers
        .transfer(
            &claims.sub,
            TransferRequest {
                to,
                amount: body.amount,
                note: body.note,
            },
        )
        .await?;

    Ok(Json(TransferResponse {
        transfer_id: receipt.transfer.id,
        new_balance: receipt.new_balance,
    }))
}

/// GET /account — the caller's ledger record.
async fn get_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.get_or_create(&claims.sub).await?;
    Ok(Json(AccountResponse {
        id: account.id,
        alias: account.alias,
        balance: account.balance,
    }))
}

/// GET /account/journal — balance-affecting history, newest first.
async fn get_journal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<JournalQuery>,
) -> Result<Json<Vec<JournalEntry>>, ApiError> {
    state.ledger.get_or_create(&claims.sub).await?;

    let entries = state
        .ledger
        .journal_for_account(&claims.sub, params.limit.unwrap_or(50))
        .await?;
    Ok(Json(entries))
}

fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    symbol: String,
    amount: Decimal,
    duration: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminResolveBody {
    session_id: String,
    action: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminResolveResponse {
    status: SessionStatus,
    new_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransferBody {
    to_user_id: Option<String>,
    to_unique_id: Option<String>,
    amount: Decimal,
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransferResponse {
    transfer_id: String,
    new_balance: Decimal,
}

#[derive(Debug, Serialize)]
struct AccountResponse {
    id: String,
    alias: String,
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct JournalQuery {
    limit: Option<usize>,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Forbidden,
    Core(CoreError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Administrator role required".to_string(),
            ),
            ApiError::Core(err) => match err {
                CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation", msg),
                CoreError::InsufficientFunds { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_funds", err.to_string())
                }
                CoreError::SelfTransfer => {
                    (StatusCode::BAD_REQUEST, "self_transfer", err.to_string())
                }
                CoreError::Conflict(msg) => (StatusCode::BAD_REQUEST, "conflict", msg),
                CoreError::NotFound(what) => {
                    (StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
                }
                CoreError::ReceiverNotFound(_) => {
                    (StatusCode::NOT_FOUND, "receiver_not_found", err.to_string())
                }
                CoreError::PartialFailure { ref transfer_id, .. } => {
                    // Never presented as a generic failure: operators grep
                    // for this code to trigger reconciliation.
                    tracing::error!("partial transfer failure surfaced to API: {err}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "transfer_partial_failure",
                        format!("transfer {transfer_id} requires manual reconciliation"),
                    )
                }
                CoreError::Storage(err) => {
                    tracing::error!("storage error: {err:#}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "Internal server error".to_string(),
                    )
                }
            },
        };

        let body = Json(json!({ "error": code, "message": message }));
        (status, body).into_response()
    }
}
