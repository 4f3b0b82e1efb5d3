use crate::client::ClientWriteError;
use crate::protocol::error_shapes::openai_error_payload;

/// Crate-wide error type for a relayed request.
///
/// Only fatal conditions live here. Per-line decode failures and upstream read
/// errors on the streaming path are logged and absorbed by the stream handler.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to read upstream response body: {0}")]
    BodyRead(#[source] std::io::Error),
    #[error("Failed to close upstream response body: {0}")]
    ResourceClose(#[source] std::io::Error),
    #[error("Failed to decode upstream response body: {0}")]
    EnvelopeDecode(#[source] serde_json::Error),
    #[error("Failed to encode converted response body: {0}")]
    Reencode(#[source] serde_json::Error),
    #[error("Failed to write response to client: {source}")]
    ClientWrite {
        /// Whether the body being written was a re-encoded (converted) one.
        converted: bool,
        #[source]
        source: ClientWriteError,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    BadGateway,
    ServerError,
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            RelayError::Transport(_) => ErrorCategory::BadGateway,
            RelayError::Config(_)
            | RelayError::BodyRead(_)
            | RelayError::ResourceClose(_)
            | RelayError::EnvelopeDecode(_)
            | RelayError::Reencode(_)
            | RelayError::ClientWrite { .. }
            | RelayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Stable machine-readable code reported in the error payload.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "config_error",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Transport(_) => "do_request_failed",
            RelayError::BodyRead(_) => "read_response_body_failed",
            RelayError::ResourceClose(_) => "close_response_body_failed",
            RelayError::EnvelopeDecode(_) => "unmarshal_response_body_failed",
            RelayError::Reencode(_) => "marshal_modified_response_failed",
            RelayError::ClientWrite {
                converted: true, ..
            } => "write_modified_response_failed",
            RelayError::ClientWrite {
                converted: false, ..
            } => "copy_response_body_failed",
            RelayError::Internal(_) => "internal_error",
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error as an `OpenAI`-style payload, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let body = openai_error_payload(cat, &err.to_string(), err.code());
    (status, body)
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
