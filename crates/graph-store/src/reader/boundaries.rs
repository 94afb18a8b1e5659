use serde_json::{json, Map, Value};

use super::{Bubble, ReadResult, Reader};
use crate::{
    error::{FieldError, FieldErrorKind, RequiredFieldError},
    payload::PathSegment,
    record::Record,
    selection::{CatchField, CatchTo, RequiredAction, RequiredField, Variables},
    snapshot::MissingRequiredFields,
};

/// Errors raised below a `@catch` field, kept away from the snapshot.
#[derive(Debug, Default)]
pub(super) struct CatchScope {
    pub errors: Vec<FieldError>,
}

/// Reader state to restore when a partial branch is discarded.
pub(super) struct Checkpoint {
    pub is_missing_data: bool,
    errors: usize,
    missing_required: Option<MissingRequiredFields>,
    scope_errors: Option<usize>,
}

impl Reader<'_> {
    pub(super) fn read_required(
        &mut self,
        record: &Record,
        required: &RequiredField,
        variables: &Variables,
        data: &mut Map<String, Value>,
    ) -> ReadResult {
        self.read_selection(record, &required.field, variables, data)?;

        let Some(response_key) = required.field.response_key() else {
            return Ok(());
        };
        if data.get(response_key).is_some_and(|value| !value.is_null()) {
            return Ok(());
        }

        self.report_required(required, response_key);
        Err(Bubble)
    }

    fn report_required(&mut self, required: &RequiredField, response_key: &str) {
        if required.action == RequiredAction::None {
            return;
        }

        let error = RequiredFieldError {
            owner: self.owner.clone(),
            path: required.path.clone(),
            action: required.action,
        };

        if let Some(scope) = self.catch_scopes.last_mut() {
            let mut path = self.path.clone();
            path.push(PathSegment::Field(response_key.to_string()));
            scope.errors.push(FieldError {
                kind: FieldErrorKind::MissingRequired,
                message: error.to_string(),
                path,
                owner: self.owner.clone(),
            });
            return;
        }

        let missing = self.missing_required.get_or_insert_with(|| MissingRequiredFields {
            action: required.action,
            fields: Vec::new(),
        });
        if required.action == RequiredAction::Throw {
            missing.action = RequiredAction::Throw;
        }
        missing.fields.push(error);
    }

    pub(super) fn read_catch(
        &mut self,
        record: &Record,
        catch: &CatchField,
        variables: &Variables,
        data: &mut Map<String, Value>,
    ) {
        self.catch_scopes.push(CatchScope::default());
        let result = self.read_selection(record, &catch.field, variables, data);
        let scope = self.catch_scopes.pop().unwrap_or_default();

        let Some(response_key) = catch.field.response_key() else {
            return;
        };

        let value = if result.is_err() || !scope.errors.is_empty() {
            tracing::debug!(
                owner = %self.owner,
                path = %catch.path,
                errors = scope.errors.len(),
                "field errors caught"
            );
            match catch.to {
                CatchTo::Null => Value::Null,
                CatchTo::Result => json!({
                    "ok": false,
                    "errors": serde_json::to_value(&scope.errors).unwrap_or_default(),
                }),
            }
        } else {
            let value = data.get_mut(response_key).map(Value::take).unwrap_or(Value::Null);
            match catch.to {
                CatchTo::Null => value,
                CatchTo::Result => json!({"ok": true, "value": value}),
            }
        };

        data.insert(response_key.to_string(), value);
    }

    pub(super) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            is_missing_data: self.is_missing_data,
            errors: self.errors.len(),
            missing_required: self.missing_required.clone(),
            scope_errors: self.catch_scopes.last().map(|scope| scope.errors.len()),
        }
    }

    pub(super) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.is_missing_data = checkpoint.is_missing_data;
        self.errors.truncate(checkpoint.errors);
        self.missing_required = checkpoint.missing_required;
        if let (Some(scope), Some(len)) = (self.catch_scopes.last_mut(), checkpoint.scope_errors) {
            scope.errors.truncate(len);
        }
    }

    pub(super) fn log_required_fields(&self) {
        let Some(missing) = &self.missing_required else {
            return;
        };
        for field in missing.fields.iter().filter(|field| field.action == RequiredAction::Log) {
            tracing::warn!(owner = %field.owner, path = %field.path, "missing required field");
        }
    }
}
