//! Request-class errors and their JSON rendering.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tonic::{Code, Status};

use crate::http::metadata::{write_metadata, HEADER_PREFIX};
use crate::http::request::DecodeFailure;
use crate::routing::NotFound;
use crate::rpc::status::http_status;

/// Any failure that ends a single HTTP request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Decode(#[from] DecodeFailure),
    #[error(transparent)]
    NotFound(#[from] NotFound),
    #[error("{}", .0.message())]
    Upstream(Status),
    #[error("failed to encode response: {0}")]
    Encode(String),
    #[error("failed to read request body: {0}")]
    Body(String),
}

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        GatewayError::Upstream(status)
    }
}

impl GatewayError {
    /// The gRPC code reported in the error body.
    pub fn code(&self) -> Code {
        match self {
            GatewayError::Decode(_) | GatewayError::Body(_) => Code::InvalidArgument,
            GatewayError::NotFound(_) => Code::NotFound,
            GatewayError::Upstream(status) => status.code(),
            GatewayError::Encode(_) => Code::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            other => http_status(other.code()),
        }
    }

    /// JSON error object, shared with the streaming error chunk.
    pub fn body(&self) -> Value {
        let message = match self {
            GatewayError::Upstream(status) => status.message().to_string(),
            other => other.to_string(),
        };
        let mut body = error_body(self.code(), &message, self.status_code());
        if let GatewayError::Decode(failure) = self {
            body["field"] = Value::String(failure.field.clone());
        }
        body
    }
}

/// `{"code", "message", "http_code", "http_status", "details"}` for a code and message.
pub fn error_body(code: Code, message: &str, status: StatusCode) -> Value {
    json!({
        "code": code as i32,
        "message": message,
        "http_code": status.as_u16(),
        "http_status": status.canonical_reason().unwrap_or("Client Closed Request"),
        "details": [],
    })
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            GatewayError::Upstream(s) => {
                tracing::debug!(code = ?s.code(), message = %s.message(), "Backend returned an error")
            }
            GatewayError::Encode(_) => tracing::error!(error = %self, "Request failed"),
            _ => tracing::debug!(error = %self, "Request rejected"),
        }

        let mut response = (status, self.body().to_string()).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let GatewayError::Upstream(s) = &self {
            write_metadata(s.metadata(), HEADER_PREFIX, response.headers_mut());
        }
        response
    }
}
