//! Computes the part of a selection the cache can't satisfy yet.
//!
//! The differ walks like the reader but builds a tree of needs aligned with the selection
//! indices. Plural links merge the needs of their items, so a field missing on any item is
//! fetched for all of them. The need tree is then used to prune the original selections.

use std::sync::Arc;

use crate::{
    identity::DataId,
    record::{FieldValue, Record},
    reader::storage_key_of,
    selection::{CatchField, Field, FragmentSpread, RequiredField, ResolverField, Selection, Selections, Variables},
    selector::Selector,
    source::{RecordEntry, RecordSource},
    type_relationships::{no_subtypes, type_matches, TypeRelationships},
};

/// Returns the selector restricted to what is not cached yet, `None` when everything is.
///
/// Pending `@defer` and `@stream` data is not part of the diff: reads don't report it as missing,
/// it arrives with the follow-up payloads of the request that announced it.
pub fn diff(selector: &Selector, source: &dyn RecordSource) -> Option<Selector> {
    let relationships = no_subtypes();
    Differ::new(source, relationships.as_ref()).diff(selector)
}

#[derive(Debug, Clone, PartialEq)]
enum Need {
    /// The whole selection list.
    Whole,
    /// Per selection, by index.
    Partial(Vec<Option<Need>>),
}

impl Need {
    fn merge(self, other: Need) -> Need {
        match (self, other) {
            (Need::Partial(left), Need::Partial(right)) => Need::Partial(
                left.into_iter()
                    .zip(right)
                    .map(|(left, right)| merge(left, right))
                    .collect(),
            ),
            _ => Need::Whole,
        }
    }
}

fn merge(left: Option<Need>, right: Option<Need>) -> Option<Need> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left.merge(right)),
        (left, right) => left.or(right),
    }
}

pub struct Differ<'a> {
    source: &'a dyn RecordSource,
    relationships: &'a dyn TypeRelationships,
    id_field: &'a str,
}

impl<'a> Differ<'a> {
    pub fn new(source: &'a dyn RecordSource, relationships: &'a dyn TypeRelationships) -> Self {
        Differ {
            source,
            relationships,
            id_field: "id",
        }
    }

    /// Identity field kept in pruned selections of linked fields, so the refetched objects
    /// normalize into the records they came from.
    pub fn with_id_field(mut self, id_field: &'a str) -> Self {
        self.id_field = id_field;
        self
    }

    pub fn diff(&self, selector: &Selector) -> Option<Selector> {
        let record = match self.source.get(&selector.data_id) {
            RecordEntry::Present(record) => record,
            RecordEntry::Deleted => return None,
            RecordEntry::Unknown => return Some(selector.clone()),
        };

        let need = self.diff_selections(record, &selector.node.selections, &selector.variables)?;
        let selections = self.prune(&selector.node.selections, &need, false);
        tracing::debug!(
            node = %selector.node.name,
            data_id = %selector.data_id,
            selections = selections.len(),
            "selector is partially cached"
        );

        Some(Selector {
            node: Arc::new(selector.node.with_selections(selections)),
            ..selector.clone()
        })
    }

    /// Whether everything `selector` selects is cached.
    pub fn check(&self, selector: &Selector) -> bool {
        self.diff(selector).is_none()
    }

    fn diff_record(&self, id: &DataId, selections: &[Selection], variables: &Variables) -> Option<Need> {
        match self.source.get(id) {
            RecordEntry::Present(record) => self.diff_selections(record, selections, variables),
            RecordEntry::Deleted => None,
            RecordEntry::Unknown => Some(Need::Whole),
        }
    }

    fn diff_selections(&self, record: &Record, selections: &[Selection], variables: &Variables) -> Option<Need> {
        let needs = selections
            .iter()
            .map(|selection| self.diff_selection(record, selection, variables))
            .collect::<Vec<_>>();

        if needs.iter().all(Option::is_none) {
            None
        } else {
            Some(Need::Partial(needs))
        }
    }

    fn diff_selection(&self, record: &Record, selection: &Selection, variables: &Variables) -> Option<Need> {
        match selection {
            Selection::ScalarField(field) => {
                if matches!(field.name.as_str(), "__typename" | "__id") || record.has(&field.storage_key(variables)) {
                    None
                } else {
                    Some(Need::Whole)
                }
            }
            Selection::LinkedField(field) => match record.get(&field.storage_key(variables)) {
                None => Some(Need::Whole),
                Some(FieldValue::Scalar(value)) if value.is_null() => None,
                Some(FieldValue::Link(id)) if !field.plural => self.diff_record(id, &field.selections, variables),
                Some(FieldValue::Links(ids)) if field.plural => ids
                    .iter()
                    .flatten()
                    .map(|id| self.diff_record(id, &field.selections, variables))
                    .fold(None, merge),
                Some(_) => Some(Need::Whole),
            },
            Selection::InlineFragment(fragment) => {
                if type_matches(self.relationships, &fragment.type_condition, record.typename()) {
                    self.diff_selections(record, &fragment.selections, variables)
                } else {
                    None
                }
            }
            Selection::FragmentSpread(spread) => {
                self.diff_selections(record, &spread.fragment.selections, &spread.fragment_variables(variables))
            }
            Selection::Condition(condition) => {
                if condition.passes(variables) {
                    self.diff_selections(record, &condition.selections, variables)
                } else {
                    None
                }
            }
            Selection::RequiredField(RequiredField { field, .. }) | Selection::CatchField(CatchField { field, .. }) => {
                self.diff_selection(record, field, variables)
            }
            Selection::ClientExtension(_) => None,
            // A deferred branch is either complete or pending, never missing.
            Selection::Defer(defer) if defer.is_active(variables) => None,
            Selection::Defer(defer) => self.diff_selections(record, &defer.selections, variables),
            Selection::Stream(stream) => {
                let pending = stream.is_active(variables)
                    && storage_key_of(&stream.field, variables).is_some_and(|key| !record.has(&key));
                if pending {
                    None
                } else {
                    self.diff_selection(record, &stream.field, variables)
                }
            }
            Selection::ResolverField(field) => field
                .fragment
                .as_ref()
                .and_then(|fragment| self.diff_selections(record, &fragment.selections, variables)),
        }
    }

    fn prune(&self, selections: &Selections, need: &Need, keep_identity: bool) -> Selections {
        let Need::Partial(needs) = need else {
            return Arc::clone(selections);
        };

        selections
            .iter()
            .zip(needs)
            .filter_map(|(selection, need)| match need {
                Some(need) => Some(self.prune_selection(selection, need)),
                None if keep_identity && self.is_identity(selection) => Some(selection.clone()),
                None => None,
            })
            .collect()
    }

    fn prune_selection(&self, selection: &Selection, need: &Need) -> Selection {
        if *need == Need::Whole {
            return selection.clone();
        }

        match selection {
            Selection::ScalarField(_) | Selection::ClientExtension(_) => selection.clone(),
            Selection::LinkedField(field) => field.with_selections(self.prune(&field.selections, need, true)).into(),
            Selection::InlineFragment(fragment) => {
                let mut fragment = fragment.clone();
                fragment.selections = self.prune(&fragment.selections, need, true);
                fragment.into()
            }
            Selection::FragmentSpread(spread) => FragmentSpread {
                fragment: Arc::new(
                    spread
                        .fragment
                        .with_selections(self.prune(&spread.fragment.selections, need, true)),
                ),
                arguments: spread.arguments.clone(),
            }
            .into(),
            Selection::Condition(condition) => {
                let mut condition = condition.clone();
                condition.selections = self.prune(&condition.selections, need, true);
                condition.into()
            }
            Selection::Defer(defer) => {
                let mut defer = defer.clone();
                defer.selections = self.prune(&defer.selections, need, true);
                defer.into()
            }
            Selection::RequiredField(required) => {
                let mut required = required.clone();
                required.field = Arc::new(self.prune_selection(&required.field, need));
                required.into()
            }
            Selection::CatchField(catch) => {
                let mut catch = catch.clone();
                catch.field = Arc::new(self.prune_selection(&catch.field, need));
                catch.into()
            }
            Selection::Stream(stream) => {
                let mut stream = stream.clone();
                stream.field = Arc::new(self.prune_selection(&stream.field, need));
                stream.into()
            }
            Selection::ResolverField(field) => {
                let fragment = field
                    .fragment
                    .as_ref()
                    .map(|fragment| Arc::new(fragment.with_selections(self.prune(&fragment.selections, need, true))));
                ResolverField {
                    fragment,
                    ..field.clone()
                }
                .into()
            }
        }
    }

    fn is_identity(&self, selection: &Selection) -> bool {
        match selection {
            Selection::ScalarField(field) => field.name == self.id_field || field.name == "__typename",
            _ => false,
        }
    }
}
