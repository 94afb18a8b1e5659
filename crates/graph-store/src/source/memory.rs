use std::sync::Arc;

use fnv::FnvHashMap;

use super::{MutableRecordSource, RecordEntry, RecordSource};
use crate::{identity::DataId, record::Record};

/// The only concrete record storage.
///
/// Records are shared behind `Arc` so snapshots and overlays can hold on to them without copying;
/// writers go through [`InMemorySource::record_mut`] which copies a record the first time it is
/// touched while still aliased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemorySource {
    records: FnvHashMap<DataId, Option<Arc<Record>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DataId, RecordEntry<'_>)> + '_ {
        self.records.iter().map(|(id, record)| (id, entry(record)))
    }

    /// Mutable access to a present record, copying it first if a snapshot still shares it.
    pub fn record_mut(&mut self, id: &DataId) -> Option<&mut Record> {
        self.records.get_mut(id)?.as_mut().map(Arc::make_mut)
    }

    /// Stores `record` under its identity and hands it back for writing.
    pub(crate) fn insert_mut(&mut self, record: Arc<Record>) -> &mut Record {
        let slot = self.records.entry(record.id().clone()).or_default();
        Arc::make_mut(slot.insert(record))
    }

    /// Stores a previously read entry back verbatim: `Some(None)` is a tombstone, `None` forgets.
    pub(crate) fn restore(&mut self, id: DataId, entry: Option<Option<Arc<Record>>>) {
        match entry {
            Some(record) => {
                self.records.insert(id, record);
            }
            None => {
                self.records.remove(&id);
            }
        }
    }
}

fn entry(record: &Option<Arc<Record>>) -> RecordEntry<'_> {
    match record {
        Some(record) => RecordEntry::Present(record),
        None => RecordEntry::Deleted,
    }
}

impl RecordSource for InMemorySource {
    fn get(&self, id: &DataId) -> RecordEntry<'_> {
        self.records.get(id).map(entry).unwrap_or(RecordEntry::Unknown)
    }

    fn ids(&self) -> Box<dyn Iterator<Item = &DataId> + '_> {
        Box::new(self.records.keys())
    }
}

impl MutableRecordSource for InMemorySource {
    fn set(&mut self, record: Arc<Record>) {
        self.records.insert(record.id().clone(), Some(record));
    }

    fn delete(&mut self, id: &DataId) {
        self.records.insert(id.clone(), None);
    }

    fn remove(&mut self, id: &DataId) {
        self.records.remove(id);
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

impl FromIterator<Record> for InMemorySource {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut source = InMemorySource::new();
        for record in iter {
            source.set(Arc::new(record));
        }
        source
    }
}
