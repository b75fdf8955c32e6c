//! Shared state and the operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use chrono::Utc;
use sequence_drip::RunTrigger;
use sequence_store::{SequenceService, StepService};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::responses::{success, ApiResponse, ApiResult};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub sequences: SequenceService,
    pub steps: StepService,
    pub runs: Arc<dyn RunTrigger>,
    pub node_id: String,
    pub version: String,
    pub start_time: Instant,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub node_id: String,
    pub environment: String,
    pub scheduler_mode: String,
    pub uptime_secs: u64,
}

/// GET /api/v1/health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = ApiResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResult {
    success(
        StatusCode::OK,
        HealthResponse {
            status: "ok".to_string(),
            node_id: state.node_id.clone(),
            uptime_secs: state.start_time.elapsed().as_secs(),
            timestamp: Utc::now().to_rfc3339(),
        },
        "Health check successful",
    )
}

/// GET /api/v1/info: Build and runtime information.
#[utoipa::path(
    get,
    path = "/api/v1/info",
    tag = "Operations",
    responses((status = 200, description = "API information", body = ApiResponse))
)]
pub async fn api_info(State(state): State<AppState>) -> ApiResult {
    success(
        StatusCode::OK,
        InfoResponse {
            name: "sequence-flow".to_string(),
            version: state.version.clone(),
            node_id: state.node_id.clone(),
            environment: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            scheduler_mode: state.runs.mode().to_string(),
            uptime_secs: state.start_time.elapsed().as_secs(),
        },
        "API information retrieved successfully",
    )
}

/// GET /ready: Readiness probe.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses((status = 200, description = "Ready"))
)]
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /: Landing page with links to the docs and probes.
pub async fn home(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Sequence Flow API</title></head>\n<body>\n\
         <h1>Sequence Flow API</h1>\n<p>Version: {}</p>\n<ul>\n\
         <li><a href=\"/api/v1/docs/swagger-ui/\">API Documentation (Swagger UI)</a></li>\n\
         <li><a href=\"/api/v1/health\">Health Check</a></li>\n\
         <li><a href=\"/api/v1/info\">API Information</a></li>\n\
         </ul>\n</body>\n</html>\n",
        state.version
    ))
}

#[cfg(test)]
mod tests {
    use crate::server::testing::{call, test_app};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_health_and_info() {
        let (app, _) = test_app();

        let (status, body) = call(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["message"], "Health check successful");

        let (status, body) = call(&app, Method::GET, "/api/v1/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "sequence-flow");
        assert_eq!(body["data"]["schedulerMode"], "in_process");
    }

    #[tokio::test]
    async fn test_readiness_and_liveness() {
        let (app, _) = test_app();
        let (status, _) = call(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, "/live", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
