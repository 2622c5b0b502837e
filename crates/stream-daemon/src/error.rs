use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use stream_proto::protocol::ApiReply;
use thiserror::Error;

use crate::provider::ProviderError;

/// Failure of an action request, as seen by the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    ProviderFailure(String),
    #[error("session core unavailable")]
    CoreUnavailable,
}

impl ControlError {
    pub fn status(&self) -> StatusCode {
        match self {
            ControlError::Unauthorized => StatusCode::UNAUTHORIZED,
            ControlError::BadRequest(_) | ControlError::ProviderFailure(_) => {
                StatusCode::BAD_REQUEST
            }
            ControlError::CoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ProviderError> for ControlError {
    fn from(e: ProviderError) -> Self {
        ControlError::ProviderFailure(e.to_string())
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiReply::error(self.to_string()))).into_response()
    }
}
