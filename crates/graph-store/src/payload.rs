//! Shapes of what the transport layer hands to the store.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a response path: either an application field name (alias) or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        PathSegment::Field(value.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        PathSegment::Index(value)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Field(name) => f.write_str(name),
        }
    }
}

/// Renders a path the way error messages print it: `me.friends.2.name`.
pub(crate) fn display_path(path: &[PathSegment]) -> String {
    path.iter().join(".")
}

/// A GraphQL error entry from a response `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, Value>>,
}

impl PayloadError {
    pub fn new(message: impl Into<String>) -> Self {
        PayloadError {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: impl IntoIterator<Item = PathSegment>) -> Self {
        self.path = Some(path.into_iter().collect());
        self
    }
}

/// A response payload. The initial payload of a request has no `label`/`path`; incremental
/// follow-ups for `@defer` and `@stream` carry both, correlating them with the placeholder the
/// initial payload left behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PayloadError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, Value>>,
}

impl ResponsePayload {
    pub fn from_data(data: Value) -> Self {
        ResponsePayload {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = PayloadError>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Turns this payload into an incremental follow-up for the placeholder at `label`/`path`.
    pub fn incremental(mut self, label: impl Into<String>, path: impl IntoIterator<Item = PathSegment>) -> Self {
        self.label = Some(label.into());
        self.path = Some(path.into_iter().collect());
        self
    }
}
