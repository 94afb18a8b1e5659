//! Client-computed fields.
//!
//! A resolver is a pure function of data read from the record it is selected on. Its output is
//! memoized per `(record, storage key)` and dropped as soon as a publication touches any of the
//! records its input was read from.

use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{identity::DataId, selection::Variables};

pub trait Resolver: Send + Sync {
    fn resolve(&self, input: ResolverInput<'_>) -> Result<Value, ResolverError>;
}

impl<F> Resolver for F
where
    F: Fn(ResolverInput<'_>) -> Result<Value, ResolverError> + Send + Sync,
{
    fn resolve(&self, input: ResolverInput<'_>) -> Result<Value, ResolverError> {
        self(input)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverInput<'a> {
    /// The resolver's fragment read on the record, if it declares one.
    pub data: Option<&'a Value>,
    pub arguments: &'a Variables,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ResolverError {
    pub message: String,
}

impl ResolverError {
    pub fn new(message: impl Into<String>) -> Self {
        ResolverError {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Resolution {
    pub value: Result<Value, ResolverError>,
    /// Records the input was read from.
    pub seen: Arc<FnvHashSet<DataId>>,
}

#[derive(Default)]
pub struct ResolverCache {
    entries: Mutex<FnvHashMap<(DataId, String), Resolution>>,
}

impl ResolverCache {
    pub(crate) fn get(&self, id: &DataId, storage_key: &str) -> Option<Resolution> {
        // Keys are owned pairs; resolver fields are rare enough that the allocation is fine.
        self.entries.lock().get(&(id.clone(), storage_key.to_string())).cloned()
    }

    pub(crate) fn insert(&self, id: DataId, storage_key: String, resolution: Resolution) {
        self.entries.lock().insert((id, storage_key), resolution);
    }

    /// Drops every memoized output whose input touched one of `updated`.
    pub fn invalidate(&self, updated: &FnvHashSet<DataId>) -> usize {
        if updated.is_empty() {
            return 0;
        }
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, resolution| resolution.seen.is_disjoint(updated));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
