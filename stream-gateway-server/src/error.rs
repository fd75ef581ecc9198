//! Maps `GatewayError` onto the HTTP boundary: status code + the
//! `{error, code?, message?}` envelope every streaming endpoint returns.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use stream_gateway_core::GatewayError;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let ServerError::Gateway(err) = self else {
            return (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response();
        };

        if matches!(err, GatewayError::ClientGone) {
            return StatusCode::OK.into_response();
        }

        let status = match &err {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::PolicyViolation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Process(_) | GatewayError::Probe(_) | GatewayError::Internal(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ClientGone => unreachable!(),
        };

        let message = match &err {
            GatewayError::PolicyViolation { message, .. } => Some(message.clone()),
            _ => None,
        };

        let body = ErrorBody {
            error: err.to_string(),
            code: err.code().map(str::to_string),
            message,
        };

        (status, Json(body)).into_response()
    }
}
