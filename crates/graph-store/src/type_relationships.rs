//! Abstract type membership. The store has no schema, so whoever compiles the selections
//! tells it which concrete types satisfy which interface or union conditions.

use std::{collections::HashMap, sync::Arc};

use fnv::FnvHashSet;

pub trait TypeRelationships: Send + Sync {
    /// Whether a record of type `typename` satisfies the type condition `type_condition`,
    /// for conditions naming a different type than `typename` itself.
    fn type_condition_matches(&self, type_condition: &str, typename: &str) -> bool;
}

/// Relationships for schemas without abstract types: only exact names match.
pub fn no_subtypes() -> Arc<dyn TypeRelationships> {
    Arc::new(NoSubtypes)
}

struct NoSubtypes;

impl TypeRelationships for NoSubtypes {
    fn type_condition_matches(&self, _type_condition: &str, _typename: &str) -> bool {
        false
    }
}

/// A plain table of abstract type to its possible concrete types.
#[derive(Debug, Clone, Default)]
pub struct PossibleTypes {
    possible_types: HashMap<String, FnvHashSet<String>>,
}

impl PossibleTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, abstract_type: impl Into<String>, possible_types: impl IntoIterator<Item = S>) -> Self {
        self.possible_types
            .entry(abstract_type.into())
            .or_default()
            .extend(possible_types.into_iter().map(Into::into));
        self
    }
}

impl TypeRelationships for PossibleTypes {
    fn type_condition_matches(&self, type_condition: &str, typename: &str) -> bool {
        self.possible_types
            .get(type_condition)
            .is_some_and(|possible| possible.contains(typename))
    }
}

pub(crate) fn type_matches(relationships: &dyn TypeRelationships, type_condition: &str, typename: &str) -> bool {
    type_condition == typename || relationships.type_condition_matches(type_condition, typename)
}
