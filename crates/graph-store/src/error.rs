use serde_json::Value;

use crate::{identity::DataId, payload::PathSegment, selection::RequiredAction};

/// The payload contradicts the selection it is normalized with. The write it belongs to is
/// rejected as a whole.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizationError {
    #[error("expected an object at `{path}`, got {found}")]
    ExpectedObject { path: String, found: &'static str },
    #[error("expected a list for the plural field at `{path}`, got {found}")]
    ExpectedList { path: String, found: &'static str },
    #[error("expected the `{typename}` at `{path}` to have an identity")]
    MissingIdentity { path: String, typename: String },
    #[error("the identity at `{path}` must be a string or a number, got {found}")]
    InvalidIdentity { path: String, found: &'static str },
    #[error("expected a `__typename` for the abstract field at `{path}`")]
    MissingTypename { path: String },
    #[error("streamed item `{path}` arrived out of order, {received} items were received so far")]
    StreamItemOutOfOrder { path: String, index: usize, received: usize },
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Failure of an updater or of one of the record proxy operations it used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateError {
    #[error("a record with identity `{0}` already exists")]
    RecordAlreadyExists(DataId),
    #[error("no record with identity `{0}`")]
    RecordNotFound(DataId),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error("update aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error("incremental payloads need both a `label` and a `path`")]
    NotIncremental,
    #[error("no pending `{label}` placeholder at `{path}`")]
    UnknownIncrementalPlaceholder { label: String, path: String },
}

/// A `@required` field was null or missing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("missing required value at `{path}` in `{owner}`")]
pub struct RequiredFieldError {
    pub owner: String,
    pub path: String,
    pub action: RequiredAction,
}

/// A read that cannot hand out its data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    RequiredField(#[from] RequiredFieldError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldErrorKind {
    /// Reported by the server for this field.
    Payload,
    /// Raised by a resolver computing this field.
    Resolver,
    /// A `@required` field without value.
    MissingRequired,
    /// Not in the cache yet. Only reported inside `@catch` boundaries.
    MissingData,
}

/// A field-level error. Uncaught ones are listed on the snapshot, caught ones are serialized
/// into the `@catch(to: RESULT)` value of their boundary.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub message: String,
    pub path: Vec<PathSegment>,
    #[serde(skip)]
    pub owner: String,
}

/// Collection wanted to sweep a record an in-flight request is about to write. The record is
/// kept, but this means collection was scheduled while the request should have been retained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("refusing to collect `{data_id}` while request `{request}` is in flight")]
pub struct GcSafetyWarning {
    pub data_id: DataId,
    pub request: String,
}
