use std::sync::Arc;

use serde_json::Value;

use super::{NormalizationResult, Normalizer};
use crate::{
    error::NormalizationError,
    identity::DataId,
    payload::{display_path, PathSegment},
    selection::{Field, Selection, Variables},
    selector::Selector,
    source::RecordSource,
};

/// Left behind by the initial payload of a request for each active `@defer` and `@stream`,
/// correlating follow-up payloads by `(label, path)` with where their data belongs.
#[derive(Debug, Clone)]
pub enum IncrementalPlaceholder {
    Defer {
        label: String,
        path: Vec<PathSegment>,
        /// The deferred selections on the record they were spread on.
        selector: Selector,
        typename: String,
    },
    Stream {
        label: String,
        /// Path of the streamed field itself. Items arrive at `path + [index]`.
        path: Vec<PathSegment>,
        parent_id: DataId,
        typename: String,
        field: Arc<Selection>,
        variables: Arc<Variables>,
    },
}

impl IncrementalPlaceholder {
    pub fn label(&self) -> &str {
        match self {
            IncrementalPlaceholder::Defer { label, .. } | IncrementalPlaceholder::Stream { label, .. } => label,
        }
    }

    pub fn path(&self) -> &[PathSegment] {
        match self {
            IncrementalPlaceholder::Defer { path, .. } | IncrementalPlaceholder::Stream { path, .. } => path,
        }
    }
}

impl Normalizer<'_> {
    /// Normalizes one streamed item and links it at `index` of the parent's plural field,
    /// keeping the items that arrived before it.
    #[allow(clippy::too_many_arguments)]
    pub fn normalize_stream_item(
        mut self,
        base: &dyn RecordSource,
        parent_id: &DataId,
        parent_typename: &str,
        field: &Selection,
        variables: &Variables,
        index: usize,
        item: Option<&Value>,
    ) -> Result<NormalizationResult, NormalizationError> {
        let item = item.filter(|item| !item.is_null());
        let parent = base.record(parent_id);

        match field {
            Selection::LinkedField(field) => {
                let storage_key = field.storage_key(variables);
                let mut links = parent
                    .and_then(|record| record.links(&storage_key))
                    .map(<[_]>::to_vec)
                    .unwrap_or_default();

                self.check_stream_index(index, links.len())?;

                let id = match item {
                    Some(item) => Some(self.normalize_child(parent_id, &storage_key, Some(index), field, variables, item)?),
                    None => None,
                };
                match links.get_mut(index) {
                    Some(link) => *link = id,
                    None => links.push(id),
                }

                self.ensure_record(parent_id, parent_typename);
                self.write(parent_id, |record| record.set_links(storage_key.as_ref(), links));
            }
            Selection::ScalarField(field) => {
                let storage_key = field.storage_key(variables);
                let mut items = parent
                    .and_then(|record| record.value(&storage_key))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                self.check_stream_index(index, items.len())?;

                let item = item.cloned().unwrap_or(Value::Null);
                match items.get_mut(index) {
                    Some(existing) => *existing = item,
                    None => items.push(item),
                }

                self.ensure_record(parent_id, parent_typename);
                self.write(parent_id, |record| record.set_value(storage_key.as_ref(), Value::Array(items)));
            }
            Selection::RequiredField(required) => {
                return self.normalize_stream_item(base, parent_id, parent_typename, &required.field, variables, index, item)
            }
            Selection::CatchField(catch) => {
                return self.normalize_stream_item(base, parent_id, parent_typename, &catch.field, variables, index, item)
            }
            _ => tracing::debug!(label = ?field.response_key(), "streamed selection is not a field"),
        }

        Ok(self.finish())
    }

    /// Items are appended in order. Redelivering one already received replaces it.
    fn check_stream_index(&self, index: usize, received: usize) -> Result<(), NormalizationError> {
        if index > received {
            return Err(NormalizationError::StreamItemOutOfOrder {
                path: display_path(&self.path),
                index,
                received,
            });
        }
        Ok(())
    }
}
