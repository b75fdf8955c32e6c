//! Step endpoints. Steps are addressed by their own id; listing is scoped
//! by `sequenceId`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sequence_core::models::{NewStep, StepUpdate};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::responses::{
    bad_request, done, failure, json_body, parse_id, success, ApiResponse, ApiResult,
};
use crate::rest::AppState;
use crate::sequence_rest::CreatedResponse;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StepListQuery {
    /// Owning sequence id.
    #[param(value_type = i64)]
    pub sequence_id: Option<String>,
}

/// POST /api/v1/steps: Add a step to an existing sequence.
#[utoipa::path(
    post,
    path = "/api/v1/steps",
    tag = "Steps",
    request_body = NewStep,
    responses(
        (status = 201, description = "Step created", body = ApiResponse),
        (status = 400, description = "Invalid step", body = ApiResponse),
    )
)]
pub async fn create_step(
    State(state): State<AppState>,
    payload: Result<Json<NewStep>, JsonRejection>,
) -> ApiResult {
    let step = json_body(payload)?;
    if step.sequence_id <= 0 {
        return Err(bad_request("sequenceId is required", "Invalid request body"));
    }
    let id = state
        .steps
        .create_step(&step)
        .await
        .map_err(|e| failure(&e, "Failed to create step"))?;
    success(StatusCode::CREATED, CreatedResponse { id }, "Step created successfully")
}

/// PUT /api/v1/steps/:id: Replace a step's content, and its order or wait when given.
#[utoipa::path(
    put,
    path = "/api/v1/steps/{id}",
    tag = "Steps",
    params(("id" = i64, Path, description = "Step id")),
    request_body = StepUpdate,
    responses(
        (status = 200, description = "Step updated", body = ApiResponse),
        (status = 404, description = "Unknown step", body = ApiResponse),
    )
)]
pub async fn update_step(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<StepUpdate>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&raw_id)?;
    let update = json_body(payload)?;
    state
        .steps
        .update_step(id, &update)
        .await
        .map_err(|e| failure(&e, "Failed to update step"))?;
    done("Step updated successfully")
}

/// DELETE /api/v1/steps/:id
#[utoipa::path(
    delete,
    path = "/api/v1/steps/{id}",
    tag = "Steps",
    params(("id" = i64, Path, description = "Step id")),
    responses(
        (status = 200, description = "Step deleted", body = ApiResponse),
        (status = 404, description = "Unknown step", body = ApiResponse),
    )
)]
pub async fn delete_step(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult {
    let id = parse_id(&raw_id)?;
    state
        .steps
        .delete_step(id)
        .await
        .map_err(|e| failure(&e, "Failed to delete step"))?;
    done("Step deleted successfully")
}

/// GET /api/v1/steps?sequenceId=: Steps of one sequence in order.
#[utoipa::path(
    get,
    path = "/api/v1/steps",
    tag = "Steps",
    params(StepListQuery),
    responses(
        (status = 200, description = "Ordered steps", body = ApiResponse),
        (status = 400, description = "Missing or invalid sequenceId", body = ApiResponse),
    )
)]
pub async fn list_steps(
    State(state): State<AppState>,
    Query(query): Query<StepListQuery>,
) -> ApiResult {
    let sequence_id = parse_id(query.sequence_id.as_deref().unwrap_or_default())?;
    let steps = state
        .steps
        .list_steps(sequence_id)
        .await
        .map_err(|e| failure(&e, "Failed to list steps"))?;
    success(StatusCode::OK, steps, "Steps fetched successfully")
}
