use indexmap::IndexMap;
use serde_json::Value;

use crate::{identity::DataId, payload::PayloadError};

/// The value stored under one storage key of a record.
///
/// A field that was never fetched has no entry at all; that absence is what the reader reports
/// as missing data. An explicit `null` is stored as `Scalar(Value::Null)`, for linked fields too.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A scalar, a list of scalars or null.
    Scalar(Value),
    /// A reference to another record.
    Link(DataId),
    /// An ordered list of references, `None` marks a null hole.
    Links(Vec<Option<DataId>>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Scalar(Value::Null))
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&DataId> {
        match self {
            FieldValue::Link(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_links(&self) -> Option<&[Option<DataId>]> {
        match self {
            FieldValue::Links(ids) => Some(ids),
            _ => None,
        }
    }
}

/// All the fields known for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: DataId,
    typename: String,
    fields: IndexMap<String, FieldValue>,
    /// Server errors attached to the field they were reported on.
    errors: IndexMap<String, Vec<PayloadError>>,
    /// Write epoch at which this record was explicitly invalidated.
    invalidated_at: Option<u64>,
}

impl Record {
    pub fn new(id: DataId, typename: impl Into<String>) -> Self {
        Record {
            id,
            typename: typename.into(),
            fields: IndexMap::new(),
            errors: IndexMap::new(),
            invalidated_at: None,
        }
    }

    pub fn id(&self) -> &DataId {
        &self.id
    }

    pub fn typename(&self) -> &str {
        &self.typename
    }

    pub fn set_typename(&mut self, typename: impl Into<String>) {
        self.typename = typename.into();
    }

    pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
        self.fields.get(storage_key)
    }

    pub fn has(&self, storage_key: &str) -> bool {
        self.fields.contains_key(storage_key)
    }

    pub fn value(&self, storage_key: &str) -> Option<&Value> {
        self.get(storage_key).and_then(FieldValue::as_scalar)
    }

    pub fn link(&self, storage_key: &str) -> Option<&DataId> {
        self.get(storage_key).and_then(FieldValue::as_link)
    }

    pub fn links(&self, storage_key: &str) -> Option<&[Option<DataId>]> {
        self.get(storage_key).and_then(FieldValue::as_links)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> + '_ {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn set(&mut self, storage_key: impl Into<String>, value: FieldValue) {
        self.fields.insert(storage_key.into(), value);
    }

    pub fn set_value(&mut self, storage_key: impl Into<String>, value: Value) {
        self.set(storage_key, FieldValue::Scalar(value));
    }

    pub fn set_link(&mut self, storage_key: impl Into<String>, id: DataId) {
        self.set(storage_key, FieldValue::Link(id));
    }

    pub fn set_links(&mut self, storage_key: impl Into<String>, ids: Vec<Option<DataId>>) {
        self.set(storage_key, FieldValue::Links(ids));
    }

    pub fn remove(&mut self, storage_key: &str) -> Option<FieldValue> {
        self.errors.shift_remove(storage_key);
        self.fields.shift_remove(storage_key)
    }

    pub fn field_errors(&self, storage_key: &str) -> &[PayloadError] {
        self.errors.get(storage_key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn set_field_errors(&mut self, storage_key: impl Into<String>, errors: Vec<PayloadError>) {
        let storage_key = storage_key.into();
        if errors.is_empty() {
            self.errors.shift_remove(&storage_key);
        } else {
            self.errors.insert(storage_key, errors);
        }
    }

    pub fn invalidated_at(&self) -> Option<u64> {
        self.invalidated_at
    }

    pub fn invalidate(&mut self, epoch: u64) {
        self.invalidated_at = Some(epoch);
    }

    /// Merges `next` into this record: every field `next` carries overwrites ours together with
    /// its errors, every field it doesn't carry is left alone.
    pub fn update(&mut self, next: &Record) {
        debug_assert_eq!(self.id, next.id);

        if self.typename != next.typename {
            tracing::warn!(
                data_id = %self.id,
                previous = %self.typename,
                next = %next.typename,
                "record typename changed between writes"
            );
            self.typename = next.typename.clone();
        }

        for (key, value) in &next.fields {
            self.fields.insert(key.clone(), value.clone());
            self.set_field_errors(key.clone(), next.field_errors(key).to_vec());
        }

        if let Some(epoch) = next.invalidated_at {
            self.invalidated_at = Some(self.invalidated_at.map_or(epoch, |current| current.max(epoch)));
        }
    }
}
