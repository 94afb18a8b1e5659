use fnv::FnvHashSet;

use super::{RecordEntry, RecordSource};
use crate::identity::DataId;

/// Read-through composition of a base source and an ordered list of overlays.
///
/// Lookups check the most recently pushed overlay first and fall back to the base. Overlays hold
/// whole records (copied on write from whatever was visible below them), so the topmost entry for
/// an identity already contains the fields of every layer underneath.
pub struct LayeredSource<'a> {
    base: &'a dyn RecordSource,
    overlays: Vec<&'a dyn RecordSource>,
}

impl<'a> LayeredSource<'a> {
    pub fn new(base: &'a dyn RecordSource) -> Self {
        LayeredSource {
            base,
            overlays: Vec::new(),
        }
    }

    pub fn with_overlays(base: &'a dyn RecordSource, overlays: impl IntoIterator<Item = &'a dyn RecordSource>) -> Self {
        LayeredSource {
            base,
            overlays: overlays.into_iter().collect(),
        }
    }

    pub fn push(&mut self, overlay: &'a dyn RecordSource) {
        self.overlays.push(overlay);
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }
}

impl RecordSource for LayeredSource<'_> {
    fn get(&self, id: &DataId) -> RecordEntry<'_> {
        for overlay in self.overlays.iter().rev() {
            match overlay.get(id) {
                RecordEntry::Unknown => continue,
                entry => return entry,
            }
        }
        self.base.get(id)
    }

    fn ids(&self) -> Box<dyn Iterator<Item = &DataId> + '_> {
        let mut seen = FnvHashSet::default();
        let ids = std::iter::once(self.base)
            .chain(self.overlays.iter().copied())
            .flat_map(|source| source.ids())
            .filter(move |id| seen.insert(*id));

        Box::new(ids)
    }
}
