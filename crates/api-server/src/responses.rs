//! The `{ data, errors, message }` envelope every `/api/v1` route answers
//! with, and the mapping from domain errors to status codes.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use sequence_core::SequenceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

pub type ApiReply = (StatusCode, Json<ApiResponse>);
pub type ApiResult = Result<ApiReply, ApiReply>;

pub fn success<T: Serialize>(status: StatusCode, data: T, message: &str) -> ApiResult {
    let data = serde_json::to_value(data)
        .map_err(|e| failure(&SequenceError::from(e), "Failed to encode response"))?;
    Ok((
        status,
        Json(ApiResponse {
            data: Some(data),
            errors: None,
            message: message.to_string(),
        }),
    ))
}

/// A 200 with a message and no payload.
pub fn done(message: &str) -> ApiResult {
    Ok((
        StatusCode::OK,
        Json(ApiResponse {
            data: None,
            errors: None,
            message: message.to_string(),
        }),
    ))
}

pub fn status_for(err: &SequenceError) -> StatusCode {
    match err {
        SequenceError::Validation(_) => StatusCode::BAD_REQUEST,
        SequenceError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn failure(err: &SequenceError, message: &str) -> ApiReply {
    let status = status_for(err);
    let errors = match err {
        SequenceError::Internal(_) => "internal error".to_string(),
        other => other.to_string(),
    };
    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "{message}");
    } else {
        warn!(error = %err, status = status.as_u16(), "{message}");
    }
    metrics::counter!("api.errors", "status" => status.as_u16().to_string()).increment(1);

    (
        status,
        Json(ApiResponse {
            data: None,
            errors: Some(errors),
            message: message.to_string(),
        }),
    )
}

pub fn bad_request(errors: impl Into<String>, message: &str) -> ApiReply {
    metrics::counter!("api.errors", "status" => "400").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse {
            data: None,
            errors: Some(errors.into()),
            message: message.to_string(),
        }),
    )
}

/// Path and query ids must be positive integers.
pub fn parse_id(raw: &str) -> Result<i64, ApiReply> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(bad_request("Invalid ID", "Invalid query parameter")),
    }
}

/// Unwraps a JSON body, turning axum's rejection into the envelope.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiReply> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(rejection.body_text(), "Invalid request body"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&SequenceError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SequenceError::not_found("sequence", 3)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SequenceError::Persistence("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(parse_id("0").is_err());
        assert!(parse_id("-1").is_err());
        assert!(parse_id("abc").is_err());
    }

    #[test]
    fn test_envelope_omits_empty_fields() {
        let (_, Json(body)) = done("Step deleted successfully").unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "Step deleted successfully" }));
    }
}
