//! Reference counting of retained operations and incremental mark and sweep.
//!
//! Marking walks the selections of every retained operation over the composed view, so records
//! only optimistic layers link to are kept as well. It is bounded by a step budget per call and
//! restarts from scratch whenever a publication or a new root lands in between two steps.

use std::{collections::VecDeque, sync::Arc, time::Instant};

use fnv::{FnvHashMap, FnvHashSet};
use indexmap::IndexMap;

use crate::{
    error::GcSafetyWarning,
    identity::DataId,
    publish_queue::PublishQueue,
    record::{FieldValue, Record},
    selection::{Field, Selection, Selections, Variables},
    selector::{OperationDescriptor, Selector},
    source::RecordSource,
    type_relationships::{type_matches, TypeRelationships},
};

#[derive(Debug, Clone)]
pub(crate) struct RetainedRoot {
    pub selector: Selector,
    pub ref_count: usize,
    /// Write epoch of the last payload committed for this operation.
    pub epoch: Option<u64>,
    pub fetch_time: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcProgress {
    /// Marking is not finished, call again.
    Pending,
    /// Collection is paused by a [`crate::GcHold`].
    Held,
    /// Nothing to collect.
    Idle,
    Done(GcOutcome),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcOutcome {
    /// Identities of the records removed from the base.
    pub collected: FnvHashSet<DataId>,
    /// Records that were kept only because an in-flight request is about to write them.
    pub safety_warnings: Vec<GcSafetyWarning>,
}

#[derive(Debug, Clone)]
enum Origin {
    Root(usize),
    Fetch(Arc<str>),
}

#[derive(Debug)]
enum Task {
    Select {
        origin: Origin,
        data_id: DataId,
        selections: Selections,
        variables: Arc<Variables>,
    },
    /// Everything linked from an optimistic record, regardless of selections.
    Links(DataId),
}

#[derive(Debug, Default)]
struct Mark {
    epoch: u64,
    generation: u64,
    worklist: Vec<Task>,
    marked: FnvHashSet<DataId>,
    link_visited: FnvHashSet<DataId>,
    /// Reached from in-flight requests but from no retained root.
    fetch_only: FnvHashMap<DataId, Arc<str>>,
    counts: FnvHashMap<DataId, usize>,
    last_root: FnvHashMap<DataId, usize>,
}

impl Mark {
    fn process(&mut self, task: Task, source: &dyn RecordSource, relationships: &dyn TypeRelationships) {
        match task {
            Task::Select {
                origin,
                data_id,
                selections,
                variables,
            } => {
                self.mark(&origin, &data_id);
                if let Some(record) = source.record(&data_id) {
                    self.traverse(relationships, &origin, record, &selections, &variables);
                }
            }
            Task::Links(data_id) => {
                if !self.link_visited.insert(data_id.clone()) {
                    return;
                }
                self.marked.insert(data_id.clone());
                self.fetch_only.remove(&data_id);
                let Some(record) = source.record(&data_id) else {
                    return;
                };
                for (_, value) in record.fields() {
                    match value {
                        FieldValue::Link(id) => self.worklist.push(Task::Links(id.clone())),
                        FieldValue::Links(ids) => {
                            self.worklist
                                .extend(ids.iter().flatten().map(|id| Task::Links(id.clone())));
                        }
                        FieldValue::Scalar(_) => {}
                    }
                }
            }
        }
    }

    fn mark(&mut self, origin: &Origin, data_id: &DataId) {
        match origin {
            Origin::Root(root) => {
                self.marked.insert(data_id.clone());
                self.fetch_only.remove(data_id);
                if self.last_root.insert(data_id.clone(), *root) != Some(*root) {
                    *self.counts.entry(data_id.clone()).or_default() += 1;
                }
            }
            Origin::Fetch(request) => {
                if !self.marked.contains(data_id) {
                    self.fetch_only.insert(data_id.clone(), Arc::clone(request));
                }
            }
        }
    }

    fn traverse(
        &mut self,
        relationships: &dyn TypeRelationships,
        origin: &Origin,
        record: &Record,
        selections: &[Selection],
        variables: &Arc<Variables>,
    ) {
        for selection in selections {
            match selection {
                Selection::ScalarField(_) => {}
                Selection::LinkedField(field) => {
                    let children = match record.get(&field.storage_key(variables)) {
                        Some(FieldValue::Link(id)) => vec![id.clone()],
                        Some(FieldValue::Links(ids)) => ids.iter().flatten().cloned().collect(),
                        _ => Vec::new(),
                    };
                    self.worklist.extend(children.into_iter().map(|data_id| Task::Select {
                        origin: origin.clone(),
                        data_id,
                        selections: Arc::clone(&field.selections),
                        variables: Arc::clone(variables),
                    }));
                }
                Selection::InlineFragment(fragment) => {
                    if type_matches(relationships, &fragment.type_condition, record.typename()) {
                        self.traverse(relationships, origin, record, &fragment.selections, variables);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let variables = Arc::new(spread.fragment_variables(variables));
                    self.traverse(relationships, origin, record, &spread.fragment.selections, &variables);
                }
                Selection::Condition(condition) => {
                    if condition.passes(variables) {
                        self.traverse(relationships, origin, record, &condition.selections, variables);
                    }
                }
                Selection::RequiredField(required) => {
                    self.traverse(relationships, origin, record, std::slice::from_ref(&*required.field), variables);
                }
                Selection::CatchField(catch) => {
                    self.traverse(relationships, origin, record, std::slice::from_ref(&*catch.field), variables);
                }
                Selection::Stream(stream) => {
                    self.traverse(relationships, origin, record, std::slice::from_ref(&*stream.field), variables);
                }
                Selection::ClientExtension(extension) => {
                    self.traverse(relationships, origin, record, &extension.selections, variables);
                }
                Selection::Defer(defer) => {
                    self.traverse(relationships, origin, record, &defer.selections, variables);
                }
                Selection::ResolverField(field) => {
                    if let Some(fragment) = &field.fragment {
                        self.traverse(relationships, origin, record, &fragment.selections, variables);
                    }
                }
            }
        }
    }
}

pub struct GarbageCollector {
    roots: IndexMap<String, RetainedRoot>,
    /// Released roots still kept, most recently released first.
    release_buffer: VecDeque<String>,
    release_buffer_size: usize,
    step_budget: usize,
    holds: usize,
    fetches: FnvHashMap<u64, (Arc<str>, Selector)>,
    requested: bool,
    generation: u64,
    mark: Option<Mark>,
    reference_counts: FnvHashMap<DataId, usize>,
}

impl GarbageCollector {
    pub fn new(release_buffer_size: usize, step_budget: usize) -> Self {
        GarbageCollector {
            roots: IndexMap::new(),
            release_buffer: VecDeque::new(),
            release_buffer_size,
            step_budget: step_budget.max(1),
            holds: 0,
            fetches: FnvHashMap::default(),
            requested: false,
            generation: 0,
            mark: None,
            reference_counts: FnvHashMap::default(),
        }
    }

    /// Retains the data of `operation`. Returns the identifier to release it with.
    pub fn retain(&mut self, operation: &OperationDescriptor) -> String {
        let identifier = operation.identifier().to_string();
        let root = self
            .roots
            .entry(identifier.clone())
            .or_insert_with(|| RetainedRoot {
                selector: operation.root.clone(),
                ref_count: 0,
                epoch: None,
                fetch_time: None,
            });
        root.ref_count += 1;
        self.release_buffer.retain(|released| *released != identifier);
        self.generation += 1;
        identifier
    }

    /// Returns whether a collection should be scheduled.
    pub fn release(&mut self, identifier: &str) -> bool {
        let Some(root) = self.roots.get_mut(identifier) else {
            return false;
        };
        root.ref_count = root.ref_count.saturating_sub(1);
        if root.ref_count > 0 {
            return false;
        }
        self.buffer(identifier.to_string())
    }

    /// Keeps a root without references in the release buffer, evicting the oldest ones.
    fn buffer(&mut self, identifier: String) -> bool {
        self.release_buffer.retain(|released| *released != identifier);
        self.release_buffer.push_front(identifier);

        let mut evicted = false;
        while self.release_buffer.len() > self.release_buffer_size {
            if let Some(identifier) = self.release_buffer.pop_back() {
                tracing::debug!(request = %identifier, "releasing root");
                self.roots.shift_remove(&identifier);
                evicted = true;
            }
        }
        if evicted {
            self.requested = true;
        }
        evicted
    }

    /// Records that a payload for `selector`'s operation was written at `epoch`. An operation
    /// nobody retains is kept for a while in the release buffer. Returns whether a collection
    /// should be scheduled.
    pub(crate) fn note_write(&mut self, selector: &Selector, epoch: u64, fetch_time: Instant) -> bool {
        let Some(owner) = &selector.owner else {
            return false;
        };
        if let Some(root) = self.roots.get_mut(&owner.identifier) {
            root.epoch = Some(epoch);
            root.fetch_time = Some(fetch_time);
            return false;
        }
        if self.release_buffer_size == 0 || !selector.data_id.is_root() {
            return false;
        }

        self.roots.insert(
            owner.identifier.clone(),
            RetainedRoot {
                selector: selector.clone(),
                ref_count: 0,
                epoch: Some(epoch),
                fetch_time: Some(fetch_time),
            },
        );
        self.generation += 1;
        self.buffer(owner.identifier.clone())
    }

    pub(crate) fn root(&self, identifier: &str) -> Option<&RetainedRoot> {
        self.roots.get(identifier)
    }

    pub fn is_retained(&self, identifier: &str) -> bool {
        self.roots.contains_key(identifier)
    }

    pub fn hold(&mut self) {
        self.holds += 1;
    }

    /// Returns whether a collection requested during the hold should now be scheduled.
    pub fn unhold(&mut self) -> bool {
        self.holds = self.holds.saturating_sub(1);
        self.holds == 0 && self.requested
    }

    pub(crate) fn track_fetch(&mut self, fetch: u64, request: &str, selector: Selector) {
        self.fetches.insert(fetch, (Arc::from(request), selector));
        self.generation += 1;
    }

    pub(crate) fn untrack_fetch(&mut self, fetch: u64) {
        self.fetches.remove(&fetch);
    }

    pub fn request_collection(&mut self) {
        self.requested = true;
    }

    /// Number of retained roots whose selections reach `id`, as of the last completed mark.
    ///
    /// Counts are only recomputed by a sweep: retaining or releasing an operation shows up after
    /// the next collection. Use [`GarbageCollector::retain_count`] for the live handle count.
    pub fn reference_count(&self, id: &DataId) -> usize {
        self.reference_counts.get(id).copied().unwrap_or_default()
    }

    /// Live retain handles on the operation `identifier`. Zero once released, even while the
    /// release buffer still keeps its data.
    pub fn retain_count(&self, identifier: &str) -> usize {
        self.roots.get(identifier).map(|root| root.ref_count).unwrap_or_default()
    }

    /// Runs one bounded slice of collection work.
    #[tracing::instrument(skip_all)]
    pub fn step(&mut self, queue: &mut PublishQueue) -> GcProgress {
        if !self.requested {
            return GcProgress::Idle;
        }
        if self.holds > 0 {
            return GcProgress::Held;
        }

        let epoch = queue.epoch();
        let mut mark = match self.mark.take() {
            Some(mark) if mark.epoch == epoch && mark.generation == self.generation => mark,
            Some(_) => {
                tracing::debug!("graph changed since marking started, restarting");
                self.start_mark(queue)
            }
            None => self.start_mark(queue),
        };

        {
            let source = queue.source();
            for _ in 0..self.step_budget {
                let Some(task) = mark.worklist.pop() else {
                    break;
                };
                mark.process(task, &source, queue.relationships());
            }
        }

        if !mark.worklist.is_empty() {
            self.mark = Some(mark);
            return GcProgress::Pending;
        }

        self.requested = false;
        GcProgress::Done(self.sweep(mark, queue))
    }

    /// Runs collection to completion, unless it is held.
    pub fn collect(&mut self, queue: &mut PublishQueue) -> Option<GcOutcome> {
        self.requested = true;
        loop {
            match self.step(queue) {
                GcProgress::Pending => continue,
                GcProgress::Done(outcome) => return Some(outcome),
                GcProgress::Held | GcProgress::Idle => return None,
            }
        }
    }

    fn start_mark(&self, queue: &PublishQueue) -> Mark {
        let mut mark = Mark {
            epoch: queue.epoch(),
            generation: self.generation,
            ..Default::default()
        };

        for (index, root) in self.roots.values().enumerate() {
            mark.worklist.push(Task::Select {
                origin: Origin::Root(index),
                data_id: root.selector.data_id.clone(),
                selections: Arc::clone(&root.selector.node.selections),
                variables: Arc::clone(&root.selector.variables),
            });
        }
        for (request, selector) in self.fetches.values() {
            mark.worklist.push(Task::Select {
                origin: Origin::Fetch(Arc::clone(request)),
                data_id: selector.data_id.clone(),
                selections: Arc::clone(&selector.node.selections),
                variables: Arc::clone(&selector.variables),
            });
        }
        mark.worklist
            .extend(queue.optimistic_ids().cloned().map(Task::Links));

        tracing::debug!(
            roots = self.roots.len(),
            fetches = self.fetches.len(),
            "marking"
        );
        mark
    }

    fn sweep(&mut self, mark: Mark, queue: &mut PublishQueue) -> GcOutcome {
        let mut safety_warnings = Vec::new();
        for (data_id, request) in &mark.fetch_only {
            if queue.base().has(data_id) {
                let warning = GcSafetyWarning {
                    data_id: data_id.clone(),
                    request: request.to_string(),
                };
                tracing::warn!(%warning, "collection scheduled during a fetch");
                safety_warnings.push(warning);
            }
        }

        let collected = queue.sweep(|id| mark.marked.contains(id) || mark.fetch_only.contains_key(id));
        self.reference_counts = mark.counts;
        tracing::debug!(collected = collected.len(), marked = mark.marked.len(), "collected");

        GcOutcome {
            collected,
            safety_warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        normalizer::NormalizeOptions,
        payload::ResponsePayload,
        selection::{LinkedField, Operation, ScalarField},
        type_relationships::no_subtypes,
    };

    fn user_query(name: &str, field: &str) -> OperationDescriptor {
        let operation = Operation::query(
            name,
            vec![LinkedField::new(field, vec![ScalarField::new("id").into(), ScalarField::new("name").into()])
                .concrete_type("User")
                .into()],
        );
        OperationDescriptor::new(Arc::new(operation), Default::default())
    }

    fn write(queue: &mut PublishQueue, operation: &OperationDescriptor, data: serde_json::Value) {
        queue
            .commit_payload(&operation.root, &ResponsePayload::from_data(data))
            .unwrap();
        queue.run();
    }

    fn ids(queue: &PublishQueue) -> Vec<&str> {
        let mut ids = queue.base().ids().map(DataId::as_str).collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    fn setup() -> (PublishQueue, OperationDescriptor, OperationDescriptor) {
        let mut queue = PublishQueue::new(no_subtypes(), NormalizeOptions::default());
        let me = user_query("MeQuery", "me");
        let boss = user_query("BossQuery", "boss");
        write(&mut queue, &me, json!({"me": {"id": "1", "name": "Zuck"}}));
        write(&mut queue, &boss, json!({"boss": {"id": "2", "name": "Sheryl"}}));
        (queue, me, boss)
    }

    #[test]
    fn retained_data_survives_collection() {
        let (mut queue, me, _) = setup();
        let mut gc = GarbageCollector::new(0, 256);
        gc.retain(&me);

        let outcome = gc.collect(&mut queue).unwrap();

        assert_eq!(outcome.collected.len(), 1);
        assert_eq!(ids(&queue), ["1", "client:root"]);
        assert_eq!(gc.reference_count(&DataId::new("1")), 1);
        assert_eq!(gc.reference_count(&DataId::new("2")), 0);
    }

    #[test]
    fn released_roots_stay_in_the_release_buffer() {
        let (mut queue, me, boss) = setup();
        let mut gc = GarbageCollector::new(1, 256);
        let me_id = gc.retain(&me);
        let boss_id = gc.retain(&boss);
        gc.retain(&boss);

        assert!(!gc.release(&boss_id));
        assert!(!gc.release(&boss_id));
        assert!(gc.is_retained(&boss_id));
        gc.collect(&mut queue);
        assert_eq!(ids(&queue), ["1", "2", "client:root"]);

        assert!(gc.release(&me_id));
        assert!(!gc.is_retained(&boss_id));
        let outcome = gc.collect(&mut queue).unwrap();
        assert_eq!(outcome.collected.len(), 1);
        assert_eq!(ids(&queue), ["1", "client:root"]);
    }

    #[test]
    fn marking_is_incremental_and_restarts_on_writes() {
        let (mut queue, me, boss) = setup();
        let mut gc = GarbageCollector::new(0, 1);
        gc.retain(&me);
        gc.request_collection();

        assert_eq!(gc.step(&mut queue), GcProgress::Pending);
        gc.retain(&boss);
        write(&mut queue, &boss, json!({"boss": {"id": "3", "name": "Susan"}}));

        let outcome = loop {
            match gc.step(&mut queue) {
                GcProgress::Pending => continue,
                GcProgress::Done(outcome) => break outcome,
                other => unreachable!("{other:?}"),
            }
        };
        assert_eq!(outcome.collected.len(), 1);
        assert_eq!(ids(&queue), ["1", "3", "client:root"]);
        assert_eq!(gc.reference_count(&DataId::root()), 2);
    }

    #[test]
    fn holds_pause_collection() {
        let (mut queue, _, _) = setup();
        let mut gc = GarbageCollector::new(0, 256);
        gc.hold();

        assert_eq!(gc.collect(&mut queue), None);
        assert_eq!(ids(&queue).len(), 3);
        assert!(gc.unhold());
        assert!(matches!(
            gc.step(&mut queue),
            GcProgress::Done(outcome) if outcome.collected.len() == 3 && outcome.safety_warnings.is_empty()
        ));
    }

    #[test]
    fn in_flight_data_is_kept_with_a_warning() {
        let (mut queue, me, boss) = setup();
        let mut gc = GarbageCollector::new(0, 256);
        gc.retain(&me);
        gc.track_fetch(1, boss.identifier(), boss.root.clone());

        let outcome = gc.collect(&mut queue).unwrap();
        assert!(outcome.collected.is_empty());
        assert_eq!(
            outcome
                .safety_warnings
                .iter()
                .map(|warning| warning.data_id.as_str())
                .collect::<Vec<_>>(),
            ["2"]
        );

        gc.untrack_fetch(1);
        assert_eq!(gc.collect(&mut queue).unwrap().collected.len(), 1);
    }
}
