//! HTTP error mapping
//!
//! Stage errors are rendered through [`StageError::public`] so prompts,
//! provider messages and SQL never reach the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blueprint_core::error::PersistenceError;
use blueprint_core::{PublicError, StageError};
use serde::Serialize;
use utoipa::ToSchema;

/// Error body returned by every endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl From<PublicError> for ErrorBody {
    fn from(e: PublicError) -> Self {
        Self {
            code: e.code.to_string(),
            message: e.message,
            correlation_id: Some(e.correlation_id),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Stage(StageError),
    MissingTenant,
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<StageError> for ApiError {
    fn from(e: StageError) -> Self {
        Self::Stage(e)
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Status code for each stage failure
pub fn stage_status(err: &StageError) -> StatusCode {
    match err {
        StageError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        StageError::Precondition { .. } => StatusCode::CONFLICT,
        StageError::InvalidOutput { .. } | StageError::StageFailure { .. } => {
            StatusCode::BAD_GATEWAY
        }
        StageError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StageError::Persistence { .. } | StageError::ContextRetrieval { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Stage(err) => (stage_status(&err), ErrorBody::from(err.public())),
            ApiError::MissingTenant => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "missing_tenant".to_string(),
                    message: "x-tenant-id header is required".to_string(),
                    correlation_id: None,
                },
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "not_found".to_string(),
                    message,
                    correlation_id: None,
                },
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "bad_request".to_string(),
                    message,
                    correlation_id: None,
                },
            ),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "internal_error".to_string(),
                        message: "Internal server error".to_string(),
                        correlation_id: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
