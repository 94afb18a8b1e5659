use fnv::FnvHashSet;
use serde_json::Value;

use crate::{
    error::{FieldError, ReadError, RequiredFieldError},
    identity::DataId,
    selection::RequiredAction,
    selector::Selector,
};

/// The immutable result of reading a selector.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub selector: Selector,
    /// Shaped like the selection. `None` when the root record is unknown or deleted.
    pub data: Option<Value>,
    /// Identities the data was derived from; a write to any of them may change it.
    pub seen_records: FnvHashSet<DataId>,
    pub is_missing_data: bool,
    /// Uncaught field errors.
    pub errors: Vec<FieldError>,
    pub missing_required_fields: Option<MissingRequiredFields>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingRequiredFields {
    /// `Throw` as soon as one of the fields throws.
    pub action: RequiredAction,
    pub fields: Vec<RequiredFieldError>,
}

impl Snapshot {
    /// The data, unless a `THROW` required field failed outside of any catch boundary.
    pub fn result(&self) -> Result<Option<&Value>, ReadError> {
        if let Some(missing) = &self.missing_required_fields {
            if let Some(field) = missing.fields.iter().find(|field| field.action == RequiredAction::Throw) {
                return Err(field.clone().into());
            }
        }
        Ok(self.data.as_ref())
    }

    pub fn touches(&self, updated: &FnvHashSet<DataId>) -> bool {
        !self.seen_records.is_disjoint(updated)
    }

    /// Whether a subscriber holding `self` would observe a difference in `other`.
    pub(crate) fn has_same_content(&self, other: &Snapshot) -> bool {
        self.data == other.data
            && self.is_missing_data == other.is_missing_data
            && self.errors == other.errors
            && self.missing_required_fields == other.missing_required_fields
    }
}
