use std::sync::Arc;

use serde_json::Value;

use crate::{
    error::UpdateError,
    identity::{DataId, ROOT_TYPE},
    normalizer::{root_typename, NormalizeOptions, Normalizer},
    payload::ResponsePayload,
    record::Record,
    selector::Selector,
    source::{InMemorySource, MutableRecordSource, RecordEntry, RecordSource},
    type_relationships::TypeRelationships,
};

/// A local mutation of the graph. Updaters are replayed whenever the optimistic layer they belong
/// to is rebased, so they must only depend on what they read through the proxy.
pub type Updater = Arc<dyn Fn(&mut RecordSourceProxy<'_>) -> Result<(), UpdateError> + Send + Sync>;

/// Copy-on-write access to records for updaters.
///
/// Reads go through to the underlying source, writes land in a sink that is published as one
/// batch once the updater succeeded. Nothing an updater does is visible if it fails.
pub struct RecordSourceProxy<'a> {
    base: &'a dyn RecordSource,
    sink: &'a mut InMemorySource,
    relationships: &'a dyn TypeRelationships,
    options: &'a NormalizeOptions,
    epoch: u64,
}

impl<'a> RecordSourceProxy<'a> {
    pub fn new(
        base: &'a dyn RecordSource,
        sink: &'a mut InMemorySource,
        relationships: &'a dyn TypeRelationships,
        options: &'a NormalizeOptions,
    ) -> Self {
        RecordSourceProxy {
            base,
            sink,
            relationships,
            options,
            epoch: 0,
        }
    }

    /// Write epoch stamped by [`RecordSourceProxy::invalidate_record`].
    pub(crate) fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// The root record, created if the graph is still empty.
    pub fn root(&mut self) -> &mut Record {
        let root = DataId::root();
        let current = match self.get(&root).record() {
            Some(record) => Arc::clone(record),
            None => Arc::new(Record::new(root, ROOT_TYPE)),
        };
        self.sink.insert_mut(current)
    }

    pub fn create(&mut self, id: DataId, typename: impl Into<String>) -> Result<&mut Record, UpdateError> {
        if self.get(&id).record().is_some() {
            return Err(UpdateError::RecordAlreadyExists(id));
        }
        Ok(self.sink.insert_mut(Arc::new(Record::new(id, typename))))
    }

    pub fn delete(&mut self, id: &DataId) {
        self.sink.delete(id);
    }

    /// Mutable access to an existing record. The first write copies it from the underlying source.
    pub fn record_mut(&mut self, id: &DataId) -> Result<&mut Record, UpdateError> {
        let current = match self.get(id).record() {
            Some(record) => Arc::clone(record),
            None => return Err(UpdateError::RecordNotFound(id.clone())),
        };
        Ok(self.sink.insert_mut(current))
    }

    pub fn set_value(&mut self, id: &DataId, storage_key: &str, value: Value) -> Result<(), UpdateError> {
        self.record_mut(id)?.set_value(storage_key, value);
        Ok(())
    }

    pub fn set_link(&mut self, id: &DataId, storage_key: &str, target: DataId) -> Result<(), UpdateError> {
        self.record_mut(id)?.set_link(storage_key, target);
        Ok(())
    }

    pub fn set_links(&mut self, id: &DataId, storage_key: &str, targets: Vec<Option<DataId>>) -> Result<(), UpdateError> {
        self.record_mut(id)?.set_links(storage_key, targets);
        Ok(())
    }

    /// Marks the record stale: reads still see its data, but operations that read it report stale
    /// availability until they are written again.
    pub fn invalidate_record(&mut self, id: &DataId) -> Result<(), UpdateError> {
        let epoch = self.epoch;
        self.record_mut(id)?.invalidate(epoch);
        Ok(())
    }

    /// Merges every entry of `source` the way a committed payload would be merged.
    pub fn publish_source(&mut self, source: &InMemorySource) {
        for (id, entry) in source.entries() {
            match entry {
                RecordEntry::Present(next) => match self.record_mut(id) {
                    Ok(record) => record.update(next),
                    Err(_) => self.sink.set(Arc::clone(next)),
                },
                RecordEntry::Deleted => self.delete(id),
                RecordEntry::Unknown => {}
            }
        }
    }

    /// Normalizes `payload` for `selector` against the current state and publishes the result.
    pub fn publish_payload(&mut self, selector: &Selector, payload: &ResponsePayload) -> Result<(), UpdateError> {
        let typename = match self.get(&selector.data_id).record() {
            Some(record) => record.typename().to_string(),
            None => root_typename(selector).to_string(),
        };
        let result = Normalizer::new(self.relationships, self.options)
            .with_errors(&payload.errors)
            .normalize(selector, &typename, payload.data.as_ref())?;
        self.publish_source(&result.source);
        Ok(())
    }
}

impl RecordSource for RecordSourceProxy<'_> {
    fn get(&self, id: &DataId) -> RecordEntry<'_> {
        if self.sink.has(id) {
            self.sink.get(id)
        } else {
            self.base.get(id)
        }
    }

    fn ids(&self) -> Box<dyn Iterator<Item = &DataId> + '_> {
        Box::new(
            self.sink
                .ids()
                .chain(self.base.ids().filter(|id| !self.sink.has(id))),
        )
    }
}
