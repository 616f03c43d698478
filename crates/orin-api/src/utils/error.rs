use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Seconds a client is told to wait before retrying an upstream failure.
const RETRY_AFTER_SECONDS: &str = "5";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No relevant documents: {0}")]
    NoRelevantDocuments(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::NoRelevantDocuments(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NoRelevantDocuments(_) => "NO_RELEVANT_DOCUMENTS",
            ApiError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::UpstreamUnavailable(_))
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::BadRequest(m)
            | ApiError::PayloadTooLarge(m)
            | ApiError::Conflict(m)
            | ApiError::NoRelevantDocuments(m)
            | ApiError::UpstreamUnavailable(m)
            | ApiError::DatabaseError(m)
            | ApiError::InternalError(m) => m,
        }
    }
}

/// Failures talking to an external collaborator (embedding API, vector
/// index, chat completion API, internal portal).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("{service} unavailable: {detail}")]
    Unavailable { service: &'static str, detail: String },

    #[error("{service} rejected the request ({status}): {detail}")]
    Rejected {
        service: &'static str,
        status: u16,
        detail: String,
    },

    #[error("{service} returned an invalid response: {detail}")]
    InvalidResponse { service: &'static str, detail: String },
}

impl UpstreamError {
    /// Classify a transport-level reqwest failure.
    pub fn from_transport(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout { service }
        } else {
            UpstreamError::Unavailable {
                service,
                detail: err.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP status. 429 and 5xx are transient.
    pub fn from_status(service: &'static str, status: u16, body: String) -> Self {
        if status == 429 || status >= 500 {
            UpstreamError::Unavailable {
                service,
                detail: format!("status {status}: {body}"),
            }
        } else {
            UpstreamError::Rejected {
                service,
                status,
                detail: body,
            }
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout { .. } | UpstreamError::Unavailable { .. } => {
                ApiError::UpstreamUnavailable(err.to_string())
            }
            UpstreamError::Rejected { .. } | UpstreamError::InvalidResponse { .. } => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => format!("{field}: {msg}"),
                    None => format!("{field}: invalid ({})", e.code),
                })
            })
            .collect();
        messages.sort();
        ApiError::BadRequest(messages.join("; "))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::DatabaseError(format!("{err:#}"))
    }
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'static str,
    message: &'a str,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        } else {
            tracing::warn!(code = self.code(), "{}", self);
        }

        let body = Json(ErrorResponse {
            error: self.code(),
            message: self.message(),
            retryable: self.is_retryable(),
        });
        let mut response = (status, body).into_response();

        match self {
            ApiError::Unauthorized(_) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            ApiError::UpstreamUnavailable(_) => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECONDS));
            }
            _ => {}
        }

        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
