use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::client_identity::ClientIdentity;
use crate::error::Error;
use crate::rate_limiter::RateLimiter;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Admission check in front of every route. Rejected requests never reach the handler.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let identity = ClientIdentity::from_request(&request);

    let decision = match limiter.check(identity.as_str()) {
        Ok(decision) => decision,
        Err(err) => return err.into_response(),
    };

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        Error::RateLimited {
            identity: identity.to_string(),
            retry_after: decision.retry_after,
        }
        .into_response()
    };

    let headers = response.headers_mut();
    headers.insert(
        RATE_LIMIT_LIMIT,
        HeaderValue::from(limiter.capacity().floor() as u64),
    );
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));

    response
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client = ClientIdentity::from_request(&request);

    info!(
        target: "jparser::middleware",
        method = %method,
        uri = %uri,
        client = %client,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "jparser::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}
