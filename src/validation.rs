use crate::error::{DecodeError, Error, Result};
use axum::http::{header, HeaderMap};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const JSON_MEDIA_TYPE: &str = "application/json";
pub const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

/// Requests carrying any headers must declare exactly `expected` as their
/// content type. Header-less requests are accepted as is.
pub fn check_content_type(headers: &HeaderMap, expected: &'static str) -> Result<()> {
    if headers.is_empty() {
        return Ok(());
    }

    let found = headers
        .get(header::CONTENT_TYPE)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    match found.as_deref() {
        Some(content_type) if content_type == expected => Ok(()),
        _ => Err(Error::ContentTypeMismatch { expected, found }),
    }
}

/// Structural check applied to a decoded payload before it is reformatted.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, document: &Value) -> std::result::Result<(), DecodeError>;
}

/// Accepts JSON:API documents whose primary data is a single resource object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonApiValidator;

#[derive(Debug, Deserialize)]
struct SingleResourceDocument {
    data: ResourceObject,
    #[serde(default)]
    included: Vec<ResourceObject>,
    #[serde(default)]
    links: Option<Map<String, Value>>,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
    #[serde(default)]
    jsonapi: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ResourceObject {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    attributes: Option<Map<String, Value>>,
    #[serde(default)]
    relationships: Option<Map<String, Value>>,
    #[serde(default)]
    links: Option<Map<String, Value>>,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

impl PayloadValidator for JsonApiValidator {
    fn validate(&self, document: &Value) -> std::result::Result<(), DecodeError> {
        let document = SingleResourceDocument::deserialize(document)
            .map_err(|e| DecodeError::JsonApi(e.to_string()))?;

        for resource in std::iter::once(&document.data).chain(&document.included) {
            if resource.kind.is_empty() {
                return Err(DecodeError::JsonApi(
                    "resource type must not be empty".to_string(),
                ));
            }
            if let Some(attributes) = &resource.attributes {
                for reserved in ["id", "type"] {
                    if attributes.contains_key(reserved) {
                        return Err(DecodeError::JsonApi(format!(
                            "attributes of {} must not contain '{}'",
                            resource.kind, reserved
                        )));
                    }
                }
            }
        }

        tracing::trace!(
            resource_type = %document.data.kind,
            resource_id = %document.data.id,
            has_relationships = document.data.relationships.is_some(),
            included = document.included.len(),
            has_links = document.links.is_some() || document.data.links.is_some(),
            has_meta = document.meta.is_some() || document.data.meta.is_some(),
            has_jsonapi = document.jsonapi.is_some(),
            "Validated JSON:API document"
        );
        Ok(())
    }
}
