//! Upline API Server — exposes the commission, withdrawal and leaderboard
//! engines over HTTP. Routing and header-based identity are thin glue; all
//! rules live in the engine crate.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use uuid::Uuid;

use upline_core::{EngineError, Settings, telemetry};
use upline_engine::{
    Caller, Period, Plan, PricingTable, accounts, commission, leaderboard, withdrawal,
};
use upline_storage::{self as storage};

/// Shared application state.
struct AppState {
    pool: sqlx::PgPool,
    settings: Settings,
    pricing: PricingTable,
}

#[tokio::main]
async fn main() {
    telemetry::init();
    let settings = Settings::from_env().expect("Failed to load settings");
    let pricing = PricingTable::from_settings(&settings).expect("Invalid plan pricing");

    tracing::info!("Starting Upline API Server");

    // Connect to database
    let pool = storage::connect(&settings.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Database ready");

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    let state = Arc::new(AppState {
        pool,
        settings,
        pricing,
    });

    let app = Router::new()
        .route("/api/v1/accounts", post(register_account))
        .route("/api/v1/accounts/:id", delete(delete_account))
        .route("/api/v1/accounts/:id/reconcile", post(reconcile_account))
        .route("/api/v1/activations", post(create_activation))
        .route("/api/v1/activations/:id/approve", post(approve_activation))
        .route("/api/v1/activations/:id/reject", post(reject_activation))
        .route("/api/v1/upgrades", post(create_upgrade))
        .route(
            "/api/v1/upgrades/:id/sponsor-approve",
            post(sponsor_approve_upgrade),
        )
        .route("/api/v1/upgrades/:id/approve", post(approve_upgrade))
        .route("/api/v1/upgrades/:id/reject", post(reject_upgrade))
        .route("/api/v1/withdrawals", post(create_withdrawal))
        .route("/api/v1/withdrawals/:id/approve", post(approve_withdrawal))
        .route("/api/v1/withdrawals/:id/reject", post(reject_withdrawal))
        .route("/api/v1/leaderboard/all-time", get(leaderboard_all_time))
        .route("/api/v1/leaderboard/:period", get(leaderboard_period))
        .route("/health", get(health))
        .with_state(state);

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

// ─── Request Payloads ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegisterBody {
    name: String,
    email: String,
    password_hash: String,
    referrer_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActivationBody {
    subject_id: Uuid,
    plan: String,
    proof_ref: String,
}

#[derive(Debug, Deserialize)]
struct UpgradeBody {
    sponsor_code: String,
    plan: String,
    proof_ref: String,
    #[serde(default)]
    discounted: bool,
}

#[derive(Debug, Deserialize)]
struct ProofBody {
    proof_ref: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawalBody {
    bank_name: String,
    bank_account_name: String,
    bank_account_number: String,
    amount: i64,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ApiResponse<ErrorBody>>);

fn json_ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

fn json_err(e: EngineError) -> ApiError {
    let status =
        StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ApiResponse {
            success: false,
            data: ErrorBody {
                kind: e.kind(),
                message: e.to_string(),
            },
        }),
    )
}

fn unauthorized(message: &str) -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse {
            success: false,
            data: ErrorBody {
                kind: "unauthorized",
                message: message.to_string(),
            },
        }),
    )
}

/// Resolve the caller identity injected by the auth layer.
fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let account_id = headers
        .get("x-account-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Uuid>().ok())
        .ok_or_else(|| unauthorized("missing or malformed x-account-id header"))?;
    let role = headers
        .get("x-account-role")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| unauthorized("missing or malformed x-account-role header"))?;

    Ok(Caller { account_id, role })
}

fn parse_plan(raw: &str) -> Result<Plan, ApiError> {
    raw.parse::<Plan>()
        .map_err(|e| json_err(EngineError::InvalidInput(e)))
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

/// POST /api/v1/accounts — register a member, optionally under a referrer.
async fn register_account(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let account = accounts::register(
        &state.pool,
        &body.name,
        &body.email,
        &body.password_hash,
        body.referrer_code.as_deref(),
    )
    .await
    .map_err(json_err)?;
    Ok((StatusCode::CREATED, json_ok(account)))
}

/// DELETE /api/v1/accounts/:id — admin-only cascade deletion.
async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    accounts::delete_account(&state.pool, &caller, id)
        .await
        .map_err(json_err)?;
    Ok(json_ok("deleted"))
}

/// POST /api/v1/accounts/:id/reconcile — realign cached balances with the ledger.
async fn reconcile_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let account = accounts::reconcile_balance(&state.pool, id)
        .await
        .map_err(json_err)?;
    Ok(json_ok(account))
}

/// POST /api/v1/activations — submit an activation request.
async fn create_activation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ActivationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let plan = parse_plan(&body.plan)?;
    let request = commission::create_activation(
        &state.pool,
        &caller,
        body.subject_id,
        plan,
        &body.proof_ref,
    )
    .await
    .map_err(json_err)?;
    Ok((StatusCode::CREATED, json_ok(request)))
}

/// POST /api/v1/activations/:id/approve — admin approval, distributes commission.
async fn approve_activation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let payouts = commission::approve_activation(&state.pool, &caller, id, &state.pricing)
        .await
        .map_err(json_err)?;
    Ok(json_ok(payouts))
}

/// POST /api/v1/activations/:id/reject — admin rejection, deletes the request.
async fn reject_activation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    commission::reject_activation(&state.pool, &caller, id)
        .await
        .map_err(json_err)?;
    Ok(json_ok("rejected"))
}

/// POST /api/v1/upgrades — submit an upgrade request under a new sponsor.
async fn create_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpgradeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let plan = parse_plan(&body.plan)?;
    let request = commission::create_upgrade(
        &state.pool,
        &caller,
        &body.sponsor_code,
        plan,
        &body.proof_ref,
        body.discounted,
    )
    .await
    .map_err(json_err)?;
    Ok((StatusCode::CREATED, json_ok(request)))
}

/// POST /api/v1/upgrades/:id/sponsor-approve — first approval step.
async fn sponsor_approve_upgrade(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ProofBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    commission::sponsor_approve_upgrade(&state.pool, &caller, id, &body.proof_ref)
        .await
        .map_err(json_err)?;
    Ok(json_ok("sponsor_approved"))
}

/// POST /api/v1/upgrades/:id/approve — final admin approval.
async fn approve_upgrade(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let payouts = commission::approve_upgrade(&state.pool, &caller, id, &state.pricing)
        .await
        .map_err(json_err)?;
    Ok(json_ok(payouts))
}

/// POST /api/v1/upgrades/:id/reject — admin rejection.
async fn reject_upgrade(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    commission::reject_upgrade(&state.pool, &caller, id)
        .await
        .map_err(json_err)?;
    Ok(json_ok("rejected"))
}

/// POST /api/v1/withdrawals — request a payout of passive income.
async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<WithdrawalBody>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let details = withdrawal::BankDetails {
        bank_name: body.bank_name,
        account_name: body.bank_account_name,
        account_number: body.bank_account_number,
    };
    let request = withdrawal::create_withdrawal(
        &state.pool,
        &caller,
        details,
        body.amount,
        state.settings.min_withdrawal,
    )
    .await
    .map_err(json_err)?;
    Ok((StatusCode::CREATED, json_ok(request)))
}

/// POST /api/v1/withdrawals/:id/approve — admin approval, debits the account.
async fn approve_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    withdrawal::approve_withdrawal(&state.pool, &caller, id)
        .await
        .map_err(json_err)?;
    Ok(json_ok("approved"))
}

/// POST /api/v1/withdrawals/:id/reject — admin rejection, no balance effect.
async fn reject_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_from_headers(&headers)?;
    withdrawal::reject_withdrawal(&state.pool, &caller, id)
        .await
        .map_err(json_err)?;
    Ok(json_ok("rejected"))
}

/// GET /api/v1/leaderboard/:period — top 10 from the latest snapshot.
async fn leaderboard_period(
    State(state): State<Arc<AppState>>,
    Path(period): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let period: Period = period
        .parse()
        .map_err(|e: String| json_err(EngineError::InvalidInput(e)))?;
    let rows = leaderboard::top(&state.pool, period)
        .await
        .map_err(json_err)?;
    Ok(json_ok(rows))
}

/// GET /api/v1/leaderboard/all-time — ranked by current balance.
async fn leaderboard_all_time(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = leaderboard::top_all_time(&state.pool)
        .await
        .map_err(json_err)?;
    Ok(json_ok(rows))
}
