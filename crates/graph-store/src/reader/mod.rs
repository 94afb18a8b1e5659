//! Reads selector-shaped data out of a record source.
//!
//! Links are followed by identity lookups only, so cyclic graphs need no special handling. A
//! `@required` field without value nulls out the object it is selected on, which in turn nulls
//! out its own parent when that parent field is required too. The compiler places the
//! annotations, the reader only follows them.

mod boundaries;

use std::sync::Arc;

use fnv::FnvHashSet;
use serde_json::{Map, Value};

use self::boundaries::CatchScope;
use crate::{
    error::{FieldError, FieldErrorKind},
    identity::DataId,
    payload::PathSegment,
    record::{FieldValue, Record},
    resolver::{Resolution, ResolverCache, ResolverInput},
    selection::{
        argument_values, Field, FragmentSpread, LinkedField, ResolverField, ScalarField, Selection, Variables,
    },
    selector::{Selector, FRAGMENTS_KEY, FRAGMENT_ID_KEY},
    snapshot::{MissingRequiredFields, Snapshot},
    source::{RecordEntry, RecordSource},
    type_relationships::{no_subtypes, type_matches, TypeRelationships},
};

/// A required field failed: the object being read becomes null.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bubble;

type ReadResult = Result<(), Bubble>;

/// Reads `selector` without abstract type knowledge and without resolver memoization.
pub fn read(selector: &Selector, source: &dyn RecordSource) -> Snapshot {
    let relationships = no_subtypes();
    let resolver_cache = ResolverCache::default();
    Reader::new(source, relationships.as_ref(), &resolver_cache).read(selector)
}

pub struct Reader<'a> {
    source: &'a dyn RecordSource,
    relationships: &'a dyn TypeRelationships,
    resolver_cache: &'a ResolverCache,
    log_required_field_errors: bool,
    owner: String,
    path: Vec<PathSegment>,
    seen: FnvHashSet<DataId>,
    is_missing_data: bool,
    errors: Vec<FieldError>,
    missing_required: Option<MissingRequiredFields>,
    catch_scopes: Vec<CatchScope>,
    client_extension_depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        relationships: &'a dyn TypeRelationships,
        resolver_cache: &'a ResolverCache,
    ) -> Self {
        Reader {
            source,
            relationships,
            resolver_cache,
            log_required_field_errors: true,
            owner: String::new(),
            path: Vec::new(),
            seen: FnvHashSet::default(),
            is_missing_data: false,
            errors: Vec::new(),
            missing_required: None,
            catch_scopes: Vec::new(),
            client_extension_depth: 0,
        }
    }

    pub fn log_required_field_errors(mut self, enabled: bool) -> Self {
        self.log_required_field_errors = enabled;
        self
    }

    pub fn read(mut self, selector: &Selector) -> Snapshot {
        self.owner = selector.node.name.clone();
        self.seen.insert(selector.data_id.clone());

        let source = self.source;
        let data = match source.get(&selector.data_id) {
            RecordEntry::Present(record) => self
                .read_object(record, &selector.node.selections, &selector.variables)
                .ok()
                .map(Value::Object),
            RecordEntry::Deleted => None,
            RecordEntry::Unknown => {
                self.mark_missing();
                None
            }
        };

        if self.log_required_field_errors {
            self.log_required_fields();
        }

        Snapshot {
            selector: selector.clone(),
            data,
            seen_records: self.seen,
            is_missing_data: self.is_missing_data,
            errors: self.errors,
            missing_required_fields: self.missing_required,
        }
    }

    fn fork(&self, owner: &str) -> Reader<'a> {
        let mut reader = Reader::new(self.source, self.relationships, self.resolver_cache);
        reader.log_required_field_errors = self.log_required_field_errors;
        reader.owner = owner.to_string();
        reader
    }

    fn read_object(&mut self, record: &Record, selections: &[Selection], variables: &Variables) -> Result<Map<String, Value>, Bubble> {
        let mut data = Map::new();
        self.traverse(record, selections, variables, &mut data)?;
        Ok(data)
    }

    fn traverse(
        &mut self,
        record: &Record,
        selections: &[Selection],
        variables: &Variables,
        data: &mut Map<String, Value>,
    ) -> ReadResult {
        for selection in selections {
            self.read_selection(record, selection, variables, data)?;
        }
        Ok(())
    }

    fn read_selection(
        &mut self,
        record: &Record,
        selection: &Selection,
        variables: &Variables,
        data: &mut Map<String, Value>,
    ) -> ReadResult {
        match selection {
            Selection::ScalarField(field) => {
                let value = self.read_scalar(record, field, variables);
                insert_merged(data, field.response_key(), value);
            }
            Selection::LinkedField(field) => {
                let value = self.read_linked(record, field, variables);
                insert_merged(data, field.response_key(), value);
            }
            Selection::InlineFragment(fragment) => {
                if type_matches(self.relationships, &fragment.type_condition, record.typename()) {
                    self.traverse(record, &fragment.selections, variables, data)?;
                }
            }
            Selection::FragmentSpread(spread) => self.read_fragment_spread(record, spread, variables, data),
            Selection::Condition(condition) => {
                if condition.passes(variables) {
                    self.traverse(record, &condition.selections, variables, data)?;
                }
            }
            Selection::RequiredField(required) => self.read_required(record, required, variables, data)?,
            Selection::CatchField(catch) => self.read_catch(record, catch, variables, data),
            Selection::ClientExtension(extension) => {
                self.client_extension_depth += 1;
                let result = self.traverse(record, &extension.selections, variables, data);
                self.client_extension_depth -= 1;
                result?;
            }
            Selection::Defer(defer) => {
                if defer.is_active(variables) {
                    self.read_deferred(record, &defer.selections, variables, data)?;
                } else {
                    self.traverse(record, &defer.selections, variables, data)?;
                }
            }
            Selection::Stream(stream) => {
                let pending = stream.is_active(variables)
                    && storage_key_of(&stream.field, variables).is_some_and(|key| !record.has(&key));
                match stream.field.response_key() {
                    Some(response_key) if pending => {
                        data.insert(response_key.to_string(), Value::Array(Vec::new()));
                    }
                    _ => self.read_selection(record, &stream.field, variables, data)?,
                }
            }
            Selection::ResolverField(field) => {
                let value = self.read_resolver(record, field, variables);
                insert_merged(data, field.response_key(), value);
            }
        }
        Ok(())
    }

    fn read_scalar(&mut self, record: &Record, field: &ScalarField, variables: &Variables) -> Value {
        match field.name.as_str() {
            "__typename" => return Value::String(record.typename().to_string()),
            "__id" => return Value::String(record.id().to_string()),
            _ => {}
        }

        let storage_key = field.storage_key(variables);
        self.path.push(field.response_key().into());
        let value = match record.get(&storage_key) {
            None => {
                self.mark_missing();
                Value::Null
            }
            Some(FieldValue::Scalar(value)) => {
                if value.is_null() {
                    self.report_payload_errors(record, &storage_key);
                }
                value.clone()
            }
            Some(FieldValue::Link(_) | FieldValue::Links(_)) => {
                tracing::debug!(data_id = %record.id(), storage_key = %storage_key, "linked value read as a scalar");
                Value::Null
            }
        };
        self.path.pop();
        value
    }

    fn read_linked(&mut self, record: &Record, field: &LinkedField, variables: &Variables) -> Value {
        let storage_key = field.storage_key(variables);
        self.path.push(field.response_key().into());

        let value = match record.get(&storage_key) {
            None => {
                self.mark_missing();
                Value::Null
            }
            Some(FieldValue::Scalar(Value::Null)) => {
                self.report_payload_errors(record, &storage_key);
                Value::Null
            }
            Some(FieldValue::Link(id)) if !field.plural => self.read_child(id, &field.selections, variables),
            Some(FieldValue::Links(ids)) if field.plural => {
                let mut items = Vec::with_capacity(ids.len());
                for (index, id) in ids.iter().enumerate() {
                    self.path.push(PathSegment::Index(index));
                    items.push(match id {
                        Some(id) => self.read_child(id, &field.selections, variables),
                        None => Value::Null,
                    });
                    self.path.pop();
                }
                Value::Array(items)
            }
            Some(_) => {
                tracing::debug!(
                    data_id = %record.id(),
                    storage_key = %storage_key,
                    plural = field.plural,
                    "stored value does not match the field's plurality"
                );
                self.mark_missing();
                Value::Null
            }
        };

        self.path.pop();
        value
    }

    fn read_child(&mut self, id: &DataId, selections: &[Selection], variables: &Variables) -> Value {
        self.seen.insert(id.clone());
        let source = self.source;
        match source.get(id) {
            RecordEntry::Present(record) => match self.read_object(record, selections, variables) {
                Ok(data) => Value::Object(data),
                Err(Bubble) => Value::Null,
            },
            RecordEntry::Deleted => Value::Null,
            RecordEntry::Unknown => {
                self.mark_missing();
                Value::Null
            }
        }
    }

    fn read_fragment_spread(
        &mut self,
        record: &Record,
        spread: &FragmentSpread,
        variables: &Variables,
        data: &mut Map<String, Value>,
    ) {
        data.insert(FRAGMENT_ID_KEY.to_string(), Value::String(record.id().to_string()));
        let fragments = data
            .entry(FRAGMENTS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(fragments) = fragments {
            fragments.insert(
                spread.fragment.name.clone(),
                Value::Object(spread.fragment_variables(variables)),
            );
        }
    }

    /// Reads a deferred branch. Until all of its data is there, its fields read as null and it
    /// doesn't count as missing data, nor does it report errors.
    fn read_deferred(
        &mut self,
        record: &Record,
        selections: &[Selection],
        variables: &Variables,
        data: &mut Map<String, Value>,
    ) -> ReadResult {
        let checkpoint = self.checkpoint();
        self.is_missing_data = false;

        let mut deferred = Map::new();
        let result = self.traverse(record, selections, variables, &mut deferred);

        if self.is_missing_data {
            self.rollback(checkpoint);
            for key in deferred.keys() {
                if !data.contains_key(key) {
                    data.insert(key.clone(), Value::Null);
                }
            }
            return Ok(());
        }

        self.is_missing_data = checkpoint.is_missing_data;
        result?;
        for (key, value) in deferred {
            insert_merged(data, &key, value);
        }
        Ok(())
    }

    fn read_resolver(&mut self, record: &Record, field: &ResolverField, variables: &Variables) -> Value {
        let storage_key = field.storage_key(variables).into_owned();
        self.path.push(field.response_key().into());

        let resolution = match self.resolver_cache.get(record.id(), &storage_key) {
            Some(resolution) => Some(resolution),
            None => self.resolve(record, field, variables, &storage_key),
        };

        let value = match resolution {
            None => Value::Null,
            Some(resolution) => {
                self.seen.extend(resolution.seen.iter().cloned());
                match resolution.value {
                    Ok(value) => value,
                    Err(error) => {
                        self.report_field_error(FieldErrorKind::Resolver, error.message);
                        Value::Null
                    }
                }
            }
        };

        self.path.pop();
        value
    }

    /// Runs the resolver unless its input is incomplete, in which case it reads as missing data.
    fn resolve(
        &mut self,
        record: &Record,
        field: &ResolverField,
        variables: &Variables,
        storage_key: &str,
    ) -> Option<Resolution> {
        let input = match &field.fragment {
            Some(fragment) => {
                let selector = Selector {
                    node: Arc::clone(fragment),
                    data_id: record.id().clone(),
                    variables: Arc::new(variables.clone()),
                    owner: None,
                };
                Some(self.fork(&fragment.name).read(&selector))
            }
            None => None,
        };

        let mut seen = FnvHashSet::default();
        seen.insert(record.id().clone());
        if let Some(input) = &input {
            seen.extend(input.seen_records.iter().cloned());
            if input.is_missing_data {
                self.seen.extend(seen);
                self.mark_missing();
                return None;
            }
        }

        let arguments = argument_values(field.arguments(), variables);
        let value = field.resolver.resolve(ResolverInput {
            data: input.as_ref().and_then(|input| input.data.as_ref()),
            arguments: &arguments,
        });
        if let Err(error) = &value {
            tracing::debug!(data_id = %record.id(), field = %field.name, %error, "resolver failed");
        }

        let resolution = Resolution {
            value,
            seen: Arc::new(seen),
        };
        self.resolver_cache
            .insert(record.id().clone(), storage_key.to_string(), resolution.clone());
        Some(resolution)
    }

    fn mark_missing(&mut self) {
        if self.client_extension_depth > 0 {
            return;
        }
        self.is_missing_data = true;
        if let Some(scope) = self.catch_scopes.last_mut() {
            scope.errors.push(FieldError {
                kind: FieldErrorKind::MissingData,
                message: "missing data".to_string(),
                path: self.path.clone(),
                owner: self.owner.clone(),
            });
        }
    }

    fn report_payload_errors(&mut self, record: &Record, storage_key: &str) {
        for error in record.field_errors(storage_key) {
            self.report_field_error(FieldErrorKind::Payload, error.message.clone());
        }
    }

    fn report_field_error(&mut self, kind: FieldErrorKind, message: String) {
        let error = FieldError {
            kind,
            message,
            path: self.path.clone(),
            owner: self.owner.clone(),
        };
        match self.catch_scopes.last_mut() {
            Some(scope) => scope.errors.push(error),
            None => self.errors.push(error),
        }
    }
}

pub(crate) fn storage_key_of(selection: &Selection, variables: &Variables) -> Option<String> {
    match selection {
        Selection::ScalarField(field) => Some(field.storage_key(variables).into_owned()),
        Selection::LinkedField(field) => Some(field.storage_key(variables).into_owned()),
        Selection::ResolverField(field) => Some(field.storage_key(variables).into_owned()),
        Selection::RequiredField(required) => storage_key_of(&required.field, variables),
        Selection::CatchField(catch) => storage_key_of(&catch.field, variables),
        Selection::Stream(stream) => storage_key_of(&stream.field, variables),
        _ => None,
    }
}

/// Inserts `value` under `key`, merging objects that several selections select into.
fn insert_merged(data: &mut Map<String, Value>, key: &str, value: Value) {
    match (data.get_mut(key), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            for (key, value) in incoming {
                insert_merged(existing, &key, value);
            }
        }
        (Some(Value::Array(existing)), Value::Array(incoming)) if existing.len() == incoming.len() => {
            for (existing, incoming) in existing.iter_mut().zip(incoming) {
                match (existing, incoming) {
                    (Value::Object(existing), Value::Object(incoming)) => {
                        for (key, value) in incoming {
                            insert_merged(existing, &key, value);
                        }
                    }
                    (existing, incoming) => *existing = incoming,
                }
            }
        }
        (_, value) => {
            data.insert(key.to_string(), value);
        }
    }
}
