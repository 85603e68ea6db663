//! API error types with structured JSON responses.
//!
//! Body shape: `{"error": {"code", "message", ...}}`. Validation errors add a
//! `fields` map; state conflicts add `current_state` and `attempted`.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core_state::CoreError;
use crate::error::CareError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted: Option<String>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(BTreeMap<String, Vec<String>>),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Cannot {attempted} {entity} in state {current_state}")]
    Conflict {
        entity: &'static str,
        current_state: String,
        attempted: String,
    },
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Content generation failed: {0}")]
    GenerationFailed(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut detail = ErrorDetail {
            code: "",
            message: String::new(),
            fields: None,
            current_state: None,
            attempted: None,
        };
        let status = match &self {
            ApiError::Validation(fields) => {
                detail.code = "VALIDATION_ERROR";
                detail.message = "Validation failed".into();
                detail.fields = Some(fields.clone());
                StatusCode::BAD_REQUEST
            }
            ApiError::BadRequest(message) => {
                detail.code = "BAD_REQUEST";
                detail.message = message.clone();
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => {
                detail.code = "AUTH_REQUIRED";
                detail.message = "Authentication credentials were not provided or are invalid".into();
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden(message) => {
                detail.code = "FORBIDDEN";
                detail.message = message.clone();
                StatusCode::FORBIDDEN
            }
            ApiError::NotFound(message) => {
                detail.code = "NOT_FOUND";
                detail.message = message.clone();
                StatusCode::NOT_FOUND
            }
            ApiError::Conflict {
                entity,
                current_state,
                attempted,
            } => {
                detail.code = "STATE_CONFLICT";
                detail.message = format!("Cannot {attempted} {entity} in state {current_state}");
                detail.current_state = Some(current_state.clone());
                detail.attempted = Some(attempted.clone());
                StatusCode::CONFLICT
            }
            ApiError::RateLimited { retry_after } => {
                detail.code = "RATE_LIMITED";
                detail.message = format!("Rate limit exceeded. Retry after {retry_after}s");
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::GenerationFailed(reason) => {
                tracing::warn!(reason, "Content generation failed");
                detail.code = "GENERATION_FAILED";
                detail.message = "Content generation failed".into();
                StatusCode::BAD_GATEWAY
            }
            ApiError::Internal(reason) => {
                tracing::error!(reason, "API internal error");
                detail.code = "INTERNAL";
                detail.message = "An internal error occurred".into();
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (status, Json(ErrorBody { error: detail })).into_response();
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<CareError> for ApiError {
    fn from(err: CareError) -> Self {
        match err {
            CareError::Validation(fields) => ApiError::Validation(fields.into_map()),
            CareError::Unauthorized(failure) => {
                tracing::debug!(?failure, "Authentication failed");
                ApiError::Unauthorized
            }
            CareError::NotFound { entity, .. } => ApiError::NotFound(format!("{} not found", capitalize(entity))),
            CareError::StateConflict {
                entity,
                current,
                attempted,
            } => ApiError::Conflict {
                entity,
                current_state: current,
                attempted,
            },
            CareError::Forbidden(message) => ApiError::Forbidden(message),
            CareError::Generation(e) => ApiError::GenerationFailed(e.to_string()),
            CareError::Database(e) => ApiError::Internal(e.to_string()),
            CareError::Storage(e) => ApiError::Internal(e.to_string()),
            CareError::Crypto(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn auth_failures_share_one_response() {
        use crate::error::AuthFailure;

        let mut bodies = Vec::new();
        for failure in [AuthFailure::InvalidCredentials, AuthFailure::InvalidToken, AuthFailure::TokenExpired] {
            let response = ApiError::from(CareError::Unauthorized(failure)).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            bodies.push(body_json(response).await);
        }
        assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let response = ApiError::RateLimited { retry_after: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
    }

    #[tokio::test]
    async fn validation_lists_fields() {
        let err: ApiError = CareError::invalid("mrn", "Patient with this MRN already exists.").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(json["error"]["fields"]["mrn"][0], "Patient with this MRN already exists.");
    }

    #[tokio::test]
    async fn conflict_reports_states() {
        let err: ApiError = CareError::conflict("visit", "completed", "start").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["current_state"], "completed");
        assert_eq!(json["error"]["attempted"], "start");
    }

    #[tokio::test]
    async fn not_found_names_entity() {
        let err: ApiError = CareError::not_found("patient", "abc").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Patient not found");
    }

    #[tokio::test]
    async fn generation_failure_is_502() {
        let err: ApiError =
            CareError::Generation(crate::pipeline::generation::GenerationError::Unavailable("x".into())).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("something broke".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }
}
