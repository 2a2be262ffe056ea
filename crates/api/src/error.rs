//! The one place `AgfsError` becomes an HTTP response: a single
//! error-to-status mapping, never scattered per-route `match`es.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use agfs_core::AgfsError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub struct ApiError(pub AgfsError);

impl From<AgfsError> for ApiError {
    fn from(e: AgfsError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AgfsError::NotFound { .. } => StatusCode::NOT_FOUND,
            AgfsError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            AgfsError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            AgfsError::AlreadyExists { .. } => StatusCode::CONFLICT,
            AgfsError::NotSupported { .. } => StatusCode::NOT_IMPLEMENTED,
            AgfsError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody { error: self.0.kind_tag().to_string(), message: self.0.context().to_string() };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }
        (status, Json(body)).into_response()
    }
}
