use crate::error::DecodeError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

/// Decode the first JSON value in `body`. Bytes after it are ignored.
pub fn decode_first_value(body: &[u8]) -> Result<Value, DecodeError> {
    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<Value>();
    match values.next() {
        Some(value) => Ok(value?),
        None => Err(DecodeError::EmptyBody),
    }
}

/// Rebuild every object in `value` with its keys in lexicographic order.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// A 200 response carrying a JSON value indented by two spaces.
#[derive(Debug)]
pub struct PrettyJson {
    body: String,
    content_type: &'static str,
}

impl PrettyJson {
    pub fn new(value: &Value, content_type: &'static str) -> Result<Self, DecodeError> {
        Ok(Self {
            body: serde_json::to_string_pretty(value)?,
            content_type,
        })
    }

    #[cfg(test)]
    fn body(&self) -> &str {
        &self.body
    }
}

impl IntoResponse for PrettyJson {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response()
    }
}
