//! Sequence CRUD endpoints and run creation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sequence_core::models::{NewSequence, Sequence};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::responses::{done, failure, json_body, parse_id, success, ApiResponse, ApiResult};
use crate::rest::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedResponse {
    pub id: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingUpdate {
    #[serde(default)]
    pub open_tracking: bool,
    #[serde(default)]
    pub click_tracking: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    pub run_id: Uuid,
    pub sequence_id: i64,
}

/// POST /api/v1/sequences: Create a sequence with its initial steps.
#[utoipa::path(
    post,
    path = "/api/v1/sequences",
    tag = "Sequences",
    request_body = NewSequence,
    responses(
        (status = 201, description = "Sequence created", body = ApiResponse),
        (status = 400, description = "Invalid sequence", body = ApiResponse),
    )
)]
pub async fn create_sequence(
    State(state): State<AppState>,
    payload: Result<Json<NewSequence>, JsonRejection>,
) -> ApiResult {
    let draft = json_body(payload)?;
    let id = state
        .sequences
        .create_sequence(&draft)
        .await
        .map_err(|e| failure(&e, "Failed to create sequence"))?;

    info!(sequence_id = id, name = %draft.name, steps = draft.steps.len(), "Sequence created");
    success(StatusCode::CREATED, CreatedResponse { id }, "Sequence created successfully")
}

/// GET /api/v1/sequences/:id: Fetch a sequence with its steps in order.
#[utoipa::path(
    get,
    path = "/api/v1/sequences/{id}",
    tag = "Sequences",
    params(("id" = i64, Path, description = "Sequence id")),
    responses(
        (status = 200, description = "Sequence with steps", body = ApiResponse),
        (status = 404, description = "Unknown sequence", body = ApiResponse),
    )
)]
pub async fn get_sequence(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult {
    let id = parse_id(&raw_id)?;
    let sequence: Sequence = state
        .sequences
        .get_sequence(id)
        .await
        .map_err(|e| failure(&e, "Failed to fetch sequence"))?;
    success(StatusCode::OK, sequence, "Sequence fetched successfully")
}

/// PUT /api/v1/sequences/:id: Update the open/click tracking flags.
#[utoipa::path(
    put,
    path = "/api/v1/sequences/{id}",
    tag = "Sequences",
    params(("id" = i64, Path, description = "Sequence id")),
    request_body = TrackingUpdate,
    responses(
        (status = 200, description = "Tracking updated", body = ApiResponse),
        (status = 404, description = "Unknown sequence", body = ApiResponse),
    )
)]
pub async fn update_tracking(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<TrackingUpdate>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&raw_id)?;
    let update = json_body(payload)?;
    state
        .sequences
        .update_tracking(id, update.open_tracking, update.click_tracking)
        .await
        .map_err(|e| failure(&e, "Failed to update tracking"))?;
    done("Tracking updated successfully")
}

/// DELETE /api/v1/sequences/:id: Delete a sequence and all of its steps.
#[utoipa::path(
    delete,
    path = "/api/v1/sequences/{id}",
    tag = "Sequences",
    params(("id" = i64, Path, description = "Sequence id")),
    responses(
        (status = 200, description = "Sequence deleted", body = ApiResponse),
        (status = 404, description = "Unknown sequence", body = ApiResponse),
    )
)]
pub async fn delete_sequence(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult {
    let id = parse_id(&raw_id)?;
    state
        .sequences
        .delete_sequence(id)
        .await
        .map_err(|e| failure(&e, "Failed to delete sequence"))?;
    info!(sequence_id = id, "Sequence deleted");
    done("Sequence deleted successfully")
}

/// POST /api/v1/sequences/:id/runs: Start a drip run over the sequence.
#[utoipa::path(
    post,
    path = "/api/v1/sequences/{id}/runs",
    tag = "Runs",
    params(("id" = i64, Path, description = "Sequence id")),
    responses(
        (status = 202, description = "Run accepted", body = ApiResponse),
        (status = 404, description = "Unknown sequence", body = ApiResponse),
    )
)]
pub async fn start_run(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult {
    let id = parse_id(&raw_id)?;
    state
        .sequences
        .get_sequence(id)
        .await
        .map_err(|e| failure(&e, "Failed to start run"))?;
    let run_id = state
        .runs
        .start(id)
        .await
        .map_err(|e| failure(&e, "Failed to start run"))?;

    success(
        StatusCode::ACCEPTED,
        RunStarted {
            run_id,
            sequence_id: id,
        },
        "Run started",
    )
}
