//! Writes response payloads into records.
//!
//! The normalizer never touches the store: everything it writes goes to a fresh
//! [`InMemorySource`] which the publish queue merges as one batch, so a payload contradicting its
//! selection leaves no partial write behind.

mod incremental;

use std::sync::Arc;

use serde_json::{Map, Value};

pub use self::incremental::IncrementalPlaceholder;
use crate::{
    error::{value_kind, FieldError, NormalizationError},
    identity::{DataId, ROOT_TYPE},
    payload::{display_path, PathSegment, PayloadError, ResponsePayload},
    reader::Reader,
    record::{FieldValue, Record},
    resolver::ResolverCache,
    selection::{Field, Fragment, LinkedField, Selection, Variables},
    selector::Selector,
    snapshot::MissingRequiredFields,
    source::{InMemorySource, LayeredSource, MutableRecordSource, RecordSource},
    type_relationships::{no_subtypes, type_matches, TypeRelationships},
};

const TYPENAME_KEY: &str = "__typename";

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    /// Payload key holding the server identity of an object.
    pub id_field: String,
    /// Write null for selected fields the payload doesn't carry instead of leaving them alone.
    pub treat_missing_fields_as_null: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            id_field: "id".to_string(),
            treat_missing_fields_as_null: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct NormalizationResult {
    /// Only the fields the payload carried, per identity.
    pub source: InMemorySource,
    /// `@defer`/`@stream` branches whose data will come in follow-up payloads.
    pub placeholders: Vec<IncrementalPlaceholder>,
}

impl NormalizationResult {
    /// Reads `selector` over `base` with this result on top, to report required-field and field
    /// errors the way a later read would, at write time.
    pub fn validate(
        &self,
        selector: &Selector,
        base: &dyn RecordSource,
        relationships: &dyn TypeRelationships,
    ) -> WriteReport {
        let composed = LayeredSource::with_overlays(base, [&self.source as &dyn RecordSource]);
        let resolver_cache = ResolverCache::default();
        let snapshot = Reader::new(&composed, relationships, &resolver_cache)
            .log_required_field_errors(false)
            .read(selector);

        WriteReport {
            missing_required_fields: snapshot.missing_required_fields,
            errors: snapshot.errors,
        }
    }
}

/// What readers of a freshly written selector will run into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    /// `@required` fields the payload left null or didn't carry.
    pub missing_required_fields: Option<MissingRequiredFields>,
    /// Server errors no `@catch` boundary handles.
    pub errors: Vec<FieldError>,
}

impl WriteReport {
    pub fn is_empty(&self) -> bool {
        self.missing_required_fields.is_none() && self.errors.is_empty()
    }
}

/// Normalizes a whole response for `selector` with the default options.
pub fn normalize(selector: &Selector, payload: &ResponsePayload) -> Result<NormalizationResult, NormalizationError> {
    let relationships = no_subtypes();
    let options = NormalizeOptions::default();
    Normalizer::new(relationships.as_ref(), &options)
        .with_errors(&payload.errors)
        .normalize(selector, root_typename(selector), payload.data.as_ref())
}

/// Typename of the record a selector is rooted on, when nothing better is known.
pub(crate) fn root_typename(selector: &Selector) -> &str {
    if selector.data_id.is_root() {
        ROOT_TYPE
    } else {
        &selector.node.type_condition
    }
}

pub struct Normalizer<'a> {
    relationships: &'a dyn TypeRelationships,
    options: &'a NormalizeOptions,
    errors: &'a [PayloadError],
    sink: InMemorySource,
    placeholders: Vec<IncrementalPlaceholder>,
    path: Vec<PathSegment>,
    client_extension_depth: usize,
}

impl<'a> Normalizer<'a> {
    pub fn new(relationships: &'a dyn TypeRelationships, options: &'a NormalizeOptions) -> Self {
        Normalizer {
            relationships,
            options,
            errors: &[],
            sink: InMemorySource::new(),
            placeholders: Vec::new(),
            path: Vec::new(),
            client_extension_depth: 0,
        }
    }

    /// Server errors to attach to the fields their path lands on.
    pub fn with_errors(mut self, errors: &'a [PayloadError]) -> Self {
        self.errors = errors;
        self
    }

    /// Response path of the data being normalized, for incremental payloads.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    #[tracing::instrument(skip_all, fields(node = %selector.node.name, data_id = %selector.data_id))]
    pub fn normalize(
        mut self,
        selector: &Selector,
        typename: &str,
        data: Option<&Value>,
    ) -> Result<NormalizationResult, NormalizationError> {
        match data {
            Some(Value::Object(data)) => {
                self.ensure_record(&selector.data_id, typename);
                self.traverse(&selector.data_id, typename, &selector.node.selections, &selector.variables, data)?;
            }
            Some(Value::Null) | None => {
                tracing::debug!("payload without data");
            }
            Some(other) => {
                return Err(NormalizationError::ExpectedObject {
                    path: display_path(&self.path),
                    found: value_kind(other),
                })
            }
        }

        tracing::debug!(records = self.sink.len(), placeholders = self.placeholders.len(), "normalized payload");
        Ok(self.finish())
    }

    fn finish(self) -> NormalizationResult {
        NormalizationResult {
            source: self.sink,
            placeholders: self.placeholders,
        }
    }

    fn traverse(
        &mut self,
        id: &DataId,
        typename: &str,
        selections: &[Selection],
        variables: &Variables,
        data: &Map<String, Value>,
    ) -> Result<(), NormalizationError> {
        for selection in selections {
            self.normalize_selection(id, typename, selection, variables, data)?;
        }
        Ok(())
    }

    fn normalize_selection(
        &mut self,
        id: &DataId,
        typename: &str,
        selection: &Selection,
        variables: &Variables,
        data: &Map<String, Value>,
    ) -> Result<(), NormalizationError> {
        match selection {
            Selection::ScalarField(field) => {
                if field.name == TYPENAME_KEY || field.name == "__id" {
                    return Ok(());
                }
                let storage_key = field.storage_key(variables);
                match data.get(field.response_key()) {
                    Some(value) => {
                        self.path.push(field.response_key().into());
                        let errors = self.errors_at(value.is_null());
                        self.path.pop();
                        self.write(id, |record| {
                            record.set_value(storage_key.as_ref(), value.clone());
                            record.set_field_errors(storage_key.as_ref(), errors);
                        });
                    }
                    None => self.write_missing(id, &storage_key),
                }
            }
            Selection::LinkedField(field) => self.normalize_linked(id, field, variables, data)?,
            Selection::InlineFragment(fragment) => {
                if type_matches(self.relationships, &fragment.type_condition, typename) {
                    self.traverse(id, typename, &fragment.selections, variables, data)?;
                }
            }
            Selection::FragmentSpread(spread) => {
                let variables = spread.fragment_variables(variables);
                self.traverse(id, typename, &spread.fragment.selections, &variables, data)?;
            }
            Selection::Condition(condition) => {
                if condition.passes(variables) {
                    self.traverse(id, typename, &condition.selections, variables, data)?;
                }
            }
            Selection::RequiredField(required) => {
                self.normalize_selection(id, typename, &required.field, variables, data)?;
            }
            Selection::CatchField(catch) => {
                self.normalize_selection(id, typename, &catch.field, variables, data)?;
            }
            Selection::ClientExtension(extension) => {
                self.client_extension_depth += 1;
                let result = self.traverse(id, typename, &extension.selections, variables, data);
                self.client_extension_depth -= 1;
                result?;
            }
            Selection::Defer(defer) => {
                if defer.is_active(variables) {
                    self.placeholders.push(IncrementalPlaceholder::Defer {
                        label: defer.label.clone(),
                        path: self.path.clone(),
                        selector: Selector::new(
                            Arc::new(Fragment::new(defer.label.clone(), typename, Arc::clone(&defer.selections))),
                            id.clone(),
                            variables.clone(),
                        ),
                        typename: typename.to_string(),
                    });
                }
                // Servers may still inline deferred fields.
                self.traverse(id, typename, &defer.selections, variables, data)?;
            }
            Selection::Stream(stream) => {
                self.normalize_selection(id, typename, &stream.field, variables, data)?;
                if let (true, Some(response_key)) = (stream.is_active(variables), stream.field.response_key()) {
                    let mut path = self.path.clone();
                    path.push(response_key.into());
                    self.placeholders.push(IncrementalPlaceholder::Stream {
                        label: stream.label.clone(),
                        path,
                        parent_id: id.clone(),
                        typename: typename.to_string(),
                        field: Arc::clone(&stream.field),
                        variables: Arc::new(variables.clone()),
                    });
                }
            }
            Selection::ResolverField(field) => {
                if let Some(fragment) = &field.fragment {
                    self.traverse(id, typename, &fragment.selections, variables, data)?;
                }
            }
        }
        Ok(())
    }

    fn normalize_linked(
        &mut self,
        id: &DataId,
        field: &LinkedField,
        variables: &Variables,
        data: &Map<String, Value>,
    ) -> Result<(), NormalizationError> {
        let storage_key = field.storage_key(variables);
        let Some(value) = data.get(field.response_key()) else {
            self.write_missing(id, &storage_key);
            return Ok(());
        };

        self.path.push(field.response_key().into());
        let normalized = self.normalize_linked_value(id, &storage_key, field, variables, value);
        let errors = self.errors_at(value.is_null());
        self.path.pop();

        let normalized = normalized?;
        self.write(id, |record| {
            record.set(storage_key.as_ref(), normalized);
            record.set_field_errors(storage_key.as_ref(), errors);
        });
        Ok(())
    }

    fn normalize_linked_value(
        &mut self,
        parent: &DataId,
        storage_key: &str,
        field: &LinkedField,
        variables: &Variables,
        value: &Value,
    ) -> Result<FieldValue, NormalizationError> {
        if value.is_null() {
            return Ok(FieldValue::Scalar(Value::Null));
        }
        if !field.plural {
            return self
                .normalize_child(parent, storage_key, None, field, variables, value)
                .map(FieldValue::Link);
        }

        let Value::Array(items) = value else {
            return Err(NormalizationError::ExpectedList {
                path: display_path(&self.path),
                found: value_kind(value),
            });
        };

        let mut ids = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if item.is_null() {
                ids.push(None);
                continue;
            }
            self.path.push(PathSegment::Index(index));
            let child = self.normalize_child(parent, storage_key, Some(index), field, variables, item);
            self.path.pop();
            ids.push(Some(child?));
        }
        Ok(FieldValue::Links(ids))
    }

    /// Normalizes one object into its own record and returns that record's identity.
    pub(crate) fn normalize_child(
        &mut self,
        parent: &DataId,
        storage_key: &str,
        index: Option<usize>,
        field: &LinkedField,
        variables: &Variables,
        value: &Value,
    ) -> Result<DataId, NormalizationError> {
        let Value::Object(object) = value else {
            return Err(NormalizationError::ExpectedObject {
                path: display_path(&self.path),
                found: value_kind(value),
            });
        };

        let typename = match object.get(TYPENAME_KEY).and_then(Value::as_str) {
            Some(typename) => typename.to_string(),
            None => field
                .concrete_type
                .clone()
                .ok_or_else(|| NormalizationError::MissingTypename {
                    path: display_path(&self.path),
                })?,
        };

        let id = match object.get(&self.options.id_field) {
            Some(Value::String(id)) => DataId::new(id.as_str()),
            Some(Value::Number(id)) => DataId::new(id.to_string()),
            Some(Value::Null) | None if field.requires_id => {
                return Err(NormalizationError::MissingIdentity {
                    path: display_path(&self.path),
                    typename,
                })
            }
            Some(Value::Null) | None => DataId::client(parent, storage_key, index),
            Some(other) => {
                return Err(NormalizationError::InvalidIdentity {
                    path: display_path(&self.path),
                    found: value_kind(other),
                })
            }
        };

        self.ensure_record(&id, &typename);
        self.traverse(&id, &typename, &field.selections, variables, object)?;
        Ok(id)
    }

    fn ensure_record(&mut self, id: &DataId, typename: &str) {
        match self.sink.record_mut(id) {
            Some(record) => {
                if record.typename() != typename {
                    record.set_typename(typename);
                }
            }
            None => self.sink.set(Arc::new(Record::new(id.clone(), typename))),
        }
    }

    fn write(&mut self, id: &DataId, write: impl FnOnce(&mut Record)) {
        if let Some(record) = self.sink.record_mut(id) {
            write(record);
        }
    }

    fn write_missing(&mut self, id: &DataId, storage_key: &str) {
        if self.options.treat_missing_fields_as_null && self.client_extension_depth == 0 {
            self.write(id, |record| record.set_value(storage_key, Value::Null));
        }
    }

    /// Server errors for the field at the current path. A null field also takes the errors
    /// reported below it, since nothing below it will be stored.
    fn errors_at(&self, is_null: bool) -> Vec<PayloadError> {
        self.errors
            .iter()
            .filter(|error| match error.path.as_deref() {
                Some(path) if is_null => path.starts_with(&self.path),
                Some(path) => path == self.path.as_slice(),
                None => false,
            })
            .cloned()
            .collect()
    }
}
