//! Drip run inspection and cancellation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use crate::responses::{bad_request, failure, success, ApiReply, ApiResponse, ApiResult};
use crate::rest::AppState;

fn parse_run_id(raw: &str) -> Result<Uuid, ApiReply> {
    Uuid::parse_str(raw).map_err(|_| bad_request("Invalid run ID", "Invalid query parameter"))
}

/// GET /api/v1/runs/:run_id: Current status and per-step send counts.
#[utoipa::path(
    get,
    path = "/api/v1/runs/{run_id}",
    tag = "Runs",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run summary", body = ApiResponse),
        (status = 404, description = "Unknown run", body = ApiResponse),
    )
)]
pub async fn get_run(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult {
    let run_id = parse_run_id(&raw_id)?;
    let summary = state
        .runs
        .status(run_id)
        .await
        .map_err(|e| failure(&e, "Failed to fetch run"))?;
    success(StatusCode::OK, summary, "Run fetched successfully")
}

/// DELETE /api/v1/runs/:run_id: Cancel at the next step boundary.
#[utoipa::path(
    delete,
    path = "/api/v1/runs/{run_id}",
    tag = "Runs",
    params(("run_id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Cancellation requested", body = ApiResponse),
        (status = 404, description = "Unknown run", body = ApiResponse),
    )
)]
pub async fn cancel_run(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult {
    let run_id = parse_run_id(&raw_id)?;
    let summary = state
        .runs
        .cancel(run_id)
        .await
        .map_err(|e| failure(&e, "Failed to cancel run"))?;
    success(StatusCode::OK, summary, "Run cancellation requested")
}
