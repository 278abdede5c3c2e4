//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ParseIdError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
///
/// Every error renders as `{"error": <message>, "code": <label>}`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body or path parameter.
    BadRequest(String),
    /// Error raised by the order fulfillment saga.
    Saga(SagaError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_status(err),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "VALIDATION",
            ApiError::Saga(err) => err.code(),
        }
    }

    /// Renders the error body, merging in `extra` fields.
    pub fn body(&self, extra: Option<serde_json::Value>) -> serde_json::Value {
        let message = match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Saga(err) => err.to_string(),
        };
        let mut body = serde_json::json!({ "error": message, "code": self.code() });
        if let (Some(serde_json::Value::Object(extra)), Some(map)) = (extra, body.as_object_mut()) {
            map.extend(extra);
        }
        body
    }

    /// Builds a response that also carries `extra` fields in its body.
    pub fn into_response_with(self, extra: serde_json::Value) -> Response {
        let status = self.status();
        self.log(status);
        (status, axum::Json(self.body(Some(extra)))).into_response()
    }

    fn log(&self, status: StatusCode) {
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = ?self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = ?self, "request rejected");
        }
    }
}

/// HTTP status for a saga error.
///
/// Upstream failures keep the collaborator's status when it reported one.
pub fn saga_status(err: &SagaError) -> StatusCode {
    match err.code() {
        "VALIDATION" | "INSUFFICIENT_STOCK" => StatusCode::BAD_REQUEST,
        "FORBIDDEN" => StatusCode::FORBIDDEN,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "CONFLICT" => StatusCode::CONFLICT,
        "UPSTREAM_FAILURE" => match err {
            SagaError::Upstream {
                status: Some(status),
                ..
            } => StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        self.log(status);
        (status, axum::Json(self.body(None))).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<ParseIdError> for ApiError {
    fn from(err: ParseIdError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
