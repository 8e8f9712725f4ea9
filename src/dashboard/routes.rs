//! Control API route handlers.
//!
//! All endpoints return JSON. Reads go straight to the store; triggers go
//! through the orchestrator so they share the cycle lease.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::engine::orchestrator::{CycleOrchestrator, StatusSnapshot};
use crate::types::{
    AutomationCycleLog, ChainScanOutcome, DecisionResult, ExecutionResult, FerryError, Run,
    TriggerType, WalletCheckResult, WalletRefillRequest,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ControlState {
    pub orchestrator: Arc<CycleOrchestrator>,
}

impl ControlState {
    pub fn new(orchestrator: Arc<CycleOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub type AppState = Arc<ControlState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Handler error. A held lease is a 409; everything else is a 500.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0.downcast_ref::<FerryError>() {
            Some(FerryError::LeaseHeld { holder }) => {
                (StatusCode::CONFLICT, format!("cycle in progress (held by {holder})"))
            }
            _ => {
                warn!(error = %self.0, "Control API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Refill listing only: restrict to PENDING.
    #[serde(default)]
    pub pending: bool,
}

fn default_limit() -> u32 {
    50
}

/// Result of a diagnostic single-phase trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", content = "result", rename_all = "snake_case")]
pub enum PhaseResponse {
    Scan(Vec<ChainScanOutcome>),
    Decide(DecisionResult),
    Execute(ExecutionResult),
    Wallets(WalletCheckResult),
}

#[derive(Debug, Clone, Serialize)]
pub struct SafeModeResponse {
    pub cleared: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusSnapshot> {
    Ok(Json(state.orchestrator.status().await?))
}

/// GET /api/cycles
pub async fn get_cycles(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Vec<AutomationCycleLog>> {
    Ok(Json(state.orchestrator.store().recent_cycle_logs(q.limit).await?))
}

/// GET /api/runs
pub async fn get_runs(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Vec<Run>> {
    Ok(Json(state.orchestrator.store().recent_runs(q.limit).await?))
}

/// GET /api/refills
pub async fn get_refills(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Vec<WalletRefillRequest>> {
    Ok(Json(
        state.orchestrator.store().refill_requests(q.pending, q.limit).await?,
    ))
}

/// POST /api/cycles
pub async fn trigger_cycle(State(state): State<AppState>) -> ApiResult<AutomationCycleLog> {
    Ok(Json(state.orchestrator.run_cycle(TriggerType::Manual).await?))
}

/// POST /api/phases/:phase
pub async fn trigger_phase(
    State(state): State<AppState>,
    Path(phase): Path<String>,
) -> Result<Json<PhaseResponse>, Response> {
    let orch = &state.orchestrator;
    let result = match phase.as_str() {
        "scan" => orch.scan_only().await.map(PhaseResponse::Scan),
        "decide" => orch.decide_only().await.map(PhaseResponse::Decide),
        "execute" => orch.execute_only().await.map(PhaseResponse::Execute),
        "wallets" => orch.check_wallets().await.map(PhaseResponse::Wallets),
        other => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown phase: {other}") })),
            )
                .into_response())
        }
    };
    result.map(Json).map_err(|e| ApiError(e).into_response())
}

/// POST /api/safe-mode/clear
pub async fn clear_safe_mode(State(state): State<AppState>) -> ApiResult<SafeModeResponse> {
    let cleared = state.orchestrator.clear_safe_mode().await?;
    Ok(Json(SafeModeResponse { cleared }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
