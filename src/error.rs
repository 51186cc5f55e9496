use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Body returned for every content type mismatch.
pub const WRONG_CONTENT_TYPE: &str = "wrong content type\n";
/// Body returned for every decode or validation failure.
pub const JSON_PARSING_ERROR: &str = "json parsing error\n";
/// Body returned when the rate limiter rejects a request.
pub const TOO_MANY_REQUESTS: &str = "You have reached maximum request limit.\n";

#[derive(Debug, Error)]
pub enum Error {
    #[error("wrong content type: expected {expected}, got {found:?}")]
    ContentTypeMismatch {
        expected: &'static str,
        found: Option<String>,
    },

    #[error("json parsing error: {0}")]
    Decode(#[from] DecodeError),

    #[error("rate limit exceeded for {identity}")]
    RateLimited {
        identity: String,
        retry_after: Duration,
    },

    #[error("client identity must not be empty")]
    InvalidIdentity,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Startup {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Why a payload could not be reformatted. Logged, never sent to the client.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty body")]
    EmptyBody,

    #[error("invalid JSON:API document: {0}")]
    JsonApi(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ContentTypeMismatch { .. } => StatusCode::BAD_REQUEST,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::InvalidIdentity
            | Error::Decode(_)
            | Error::Config(_)
            | Error::Startup { .. }
            | Error::Serve(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Error::ContentTypeMismatch { .. } => WRONG_CONTENT_TYPE,
            Error::RateLimited { .. } => TOO_MANY_REQUESTS,
            Error::Decode(_) => JSON_PARSING_ERROR,
            _ => "internal server error\n",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::RateLimited { identity, .. } => {
                tracing::debug!(client = %identity, "Request rejected by rate limiter");
            }
            Error::ContentTypeMismatch { .. } | Error::Decode(_) => {
                tracing::warn!(error = %self, "Rejecting request payload");
            }
            _ => {
                tracing::error!(error = %self, "Request failed");
            }
        }

        let mut resp = (self.status_code(), self.public_message()).into_response();
        let headers = resp.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );

        if let Error::RateLimited { retry_after, .. } = &self {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        resp
    }
}
