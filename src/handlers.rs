use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use crate::clock::{RandomDelay, Timer};
use crate::error::Error;
use crate::rate_limiter::RateLimiter;
use crate::response::{decode_first_value, sort_keys, PrettyJson};
use crate::validation::{
    check_content_type, JsonApiValidator, PayloadValidator, JSONAPI_MEDIA_TYPE, JSON_MEDIA_TYPE,
};

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Application state containing the rate limiter, the work timer and the JSON:API validator
pub struct AppState {
    pub rate_limiter: RateLimiter,
    pub timer: Arc<dyn Timer>,
    pub validator: Arc<dyn PayloadValidator>,
}

impl AppState {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            rate_limiter,
            timer: Arc::new(RandomDelay::default()),
            validator: Arc::new(JsonApiValidator),
        }
    }

    pub fn with_timer(mut self, timer: impl Timer + 'static) -> Self {
        self.timer = Arc::new(timer);
        self
    }

    pub fn with_validator(mut self, validator: impl PayloadValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }
}

/// Simulate slow backend work
pub async fn do_some_work(State(state): State<SharedState>) -> StatusCode {
    state.timer.delay().await;
    StatusCode::OK
}

/// Re-encode a JSON body with two space indentation, keeping key order
pub async fn parse_json(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<PrettyJson, Error> {
    check_content_type(&headers, JSON_MEDIA_TYPE)?;

    let delay = state.timer.delay();

    let value = decode_first_value(&body)?;
    let response = PrettyJson::new(&value, JSON_MEDIA_TYPE)?;

    delay.await;
    Ok(response)
}

/// Validate a JSON:API document and re-encode it with sorted keys
pub async fn parse_jsonapi(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<PrettyJson, Error> {
    check_content_type(&headers, JSONAPI_MEDIA_TYPE)?;

    let delay = state.timer.delay();

    let value = decode_first_value(&body)?;
    state.validator.validate(&value)?;
    let response = PrettyJson::new(&sort_keys(value), JSONAPI_MEDIA_TYPE)?;

    delay.await;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Delay, ImmediateTimer};
    use crate::config::Config;
    use crate::error::DecodeError;
    use axum::http::{header, HeaderValue};
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTimer(Arc<AtomicUsize>);

    impl Timer for CountingTimer {
        fn delay(&self) -> Delay {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(std::future::ready(()))
        }
    }

    struct RejectAll;

    impl PayloadValidator for RejectAll {
        fn validate(&self, _document: &Value) -> Result<(), DecodeError> {
            Err(DecodeError::JsonApi("rejected".to_string()))
        }
    }

    fn state() -> AppState {
        let limiter = RateLimiter::new(&Config::default()).unwrap();
        AppState::new(limiter).with_timer(ImmediateTimer)
    }

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_do_some_work_waits_for_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(state().with_timer(CountingTimer(Arc::clone(&calls))));

        assert_eq!(do_some_work(State(state)).await, StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parse_json_success() {
        let state = Arc::new(state());
        let resp = parse_json(
            State(state),
            headers(JSON_MEDIA_TYPE),
            Bytes::from_static(br#"{"b":1,"a":[true]}"#),
        )
        .await
        .unwrap()
        .into_response();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], JSON_MEDIA_TYPE);
        assert_eq!(
            body_string(resp).await,
            "{\n  \"b\": 1,\n  \"a\": [\n    true\n  ]\n}"
        );
    }

    #[tokio::test]
    async fn test_parse_json_rejects_before_starting_delay() {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(state().with_timer(CountingTimer(Arc::clone(&calls))));

        let err = parse_json(
            State(state),
            headers(JSONAPI_MEDIA_TYPE),
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ContentTypeMismatch { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parse_json_decode_error() {
        let state = Arc::new(state());
        let err = parse_json(State(state), HeaderMap::new(), Bytes::from_static(b"["))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::Json(_))));
    }

    #[tokio::test]
    async fn test_parse_jsonapi_uses_validator() {
        let state = Arc::new(state().with_validator(RejectAll));
        let err = parse_jsonapi(
            State(state),
            headers(JSONAPI_MEDIA_TYPE),
            Bytes::from_static(br#"{"data":{"type":"articles","id":"1"}}"#),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::JsonApi(_))));
    }

    #[tokio::test]
    async fn test_parse_jsonapi_sorts_keys() {
        let state = Arc::new(state());
        let resp = parse_jsonapi(
            State(state),
            headers(JSONAPI_MEDIA_TYPE),
            Bytes::from_static(br#"{"data":{"type":"people","id":"7","attributes":{"name":"x","age":3}}}"#),
        )
        .await
        .unwrap()
        .into_response();

        assert_eq!(resp.headers()[header::CONTENT_TYPE], JSONAPI_MEDIA_TYPE);
        let body = body_string(resp).await;
        let order: Vec<usize> = ["\"age\"", "\"name\"", "\"id\"", "\"type\""]
            .iter()
            .map(|key| body.find(key).unwrap())
            .collect();
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{}", body);
    }
}
