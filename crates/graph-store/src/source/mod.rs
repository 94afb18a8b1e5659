//! Identity to record storage, and the layered view composing optimistic overlays on top of it.

mod layered;
mod memory;

use std::sync::Arc;

pub use self::{layered::LayeredSource, memory::InMemorySource};
use crate::{identity::DataId, record::Record};

/// What a source knows about one identity.
#[derive(Debug, Clone, Copy)]
pub enum RecordEntry<'a> {
    Present(&'a Arc<Record>),
    /// The server said this entity doesn't exist (or a writer deleted it).
    Deleted,
    /// Nothing is known about this identity.
    Unknown,
}

impl<'a> RecordEntry<'a> {
    pub fn record(self) -> Option<&'a Arc<Record>> {
        match self {
            RecordEntry::Present(record) => Some(record),
            RecordEntry::Deleted | RecordEntry::Unknown => None,
        }
    }

    pub fn state(self) -> RecordState {
        match self {
            RecordEntry::Present(_) => RecordState::Existent,
            RecordEntry::Deleted => RecordState::Nonexistent,
            RecordEntry::Unknown => RecordState::Unknown,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, RecordEntry::Unknown)
    }

    /// Detaches the entry from the source it was read from. Records are shared, so this is cheap.
    pub fn detach(self) -> Option<Option<Arc<Record>>> {
        match self {
            RecordEntry::Present(record) => Some(Some(Arc::clone(record))),
            RecordEntry::Deleted => Some(None),
            RecordEntry::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RecordState {
    Existent,
    Nonexistent,
    Unknown,
}

/// Read access to records.
pub trait RecordSource {
    fn get(&self, id: &DataId) -> RecordEntry<'_>;

    /// Every identity this source has an entry for, tombstones included.
    fn ids(&self) -> Box<dyn Iterator<Item = &DataId> + '_>;

    fn has(&self, id: &DataId) -> bool {
        !self.get(id).is_unknown()
    }

    fn status(&self, id: &DataId) -> RecordState {
        self.get(id).state()
    }

    fn record(&self, id: &DataId) -> Option<&Arc<Record>> {
        self.get(id).record()
    }
}

/// A concrete source writes target. Composed views never implement this.
pub trait MutableRecordSource: RecordSource {
    /// Stores `record` under its own identity, replacing whatever was there.
    fn set(&mut self, record: Arc<Record>);

    /// Leaves a tombstone: the identity is known not to exist.
    fn delete(&mut self, id: &DataId);

    /// Forgets the identity entirely.
    fn remove(&mut self, id: &DataId);

    fn clear(&mut self);
}
