//! The store surface: a cheap handle over the publish queue, the garbage collector and the
//! subscriptions, all behind one lock.

mod handles;
mod incremental;
mod scheduler;

use std::{
    convert::Infallible,
    sync::{Arc, Weak},
    time::Instant,
};

use indexmap::IndexMap;
use parking_lot::Mutex;

pub use self::{
    handles::{FetchHandle, GcHold, RetainHandle, Subscription},
    scheduler::{GcScheduler, GcTask, ImmediateScheduler, ManualScheduler},
};
use self::incremental::{normalize_incremental, IncrementalTracker};
use crate::{
    config::StoreConfig,
    differ::Differ,
    error::{StoreError, UpdateError},
    gc::{GarbageCollector, GcOutcome},
    identity::DataId,
    normalizer::WriteReport,
    payload::{display_path, ResponsePayload},
    proxy::Updater,
    publish_queue::{OptimisticToken, OptimisticUpdate, PublishQueue, RunResult},
    reader::Reader,
    resolver::ResolverCache,
    selector::{OperationDescriptor, Selector},
    snapshot::Snapshot,
    source::{InMemorySource, RecordSource},
    type_relationships::{no_subtypes, TypeRelationships},
};

type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Whether an operation can be rendered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Everything is cached. `fetch_time` is when the operation was last written, if it is
    /// retained.
    Available { fetch_time: Option<Instant> },
    /// Everything is cached, but it was invalidated or has expired since it was written.
    Stale,
    Missing,
}

struct SubscriptionEntry {
    snapshot: Snapshot,
    callback: Callback,
}

pub(crate) struct StoreState {
    pub(crate) queue: PublishQueue,
    pub(crate) gc: GarbageCollector,
    subscriptions: IndexMap<u64, SubscriptionEntry>,
    incremental: IncrementalTracker,
    next_handle: u64,
}

pub(crate) struct StoreInner {
    pub(crate) state: Mutex<StoreState>,
    config: StoreConfig,
    relationships: Arc<dyn TypeRelationships>,
    resolver_cache: ResolverCache,
    scheduler: Arc<dyn GcScheduler>,
}

/// A normalized graph cache. Clones share the same records.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

pub struct StoreBuilder {
    config: StoreConfig,
    relationships: Arc<dyn TypeRelationships>,
    scheduler: Arc<dyn GcScheduler>,
}

impl StoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn type_relationships(mut self, relationships: Arc<dyn TypeRelationships>) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn gc_scheduler(mut self, scheduler: Arc<dyn GcScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn build(self) -> Store {
        let queue = PublishQueue::new(Arc::clone(&self.relationships), self.config.normalize_options());
        let gc = GarbageCollector::new(self.config.gc_release_buffer_size, self.config.gc_step_budget);

        Store {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    queue,
                    gc,
                    subscriptions: IndexMap::new(),
                    incremental: IncrementalTracker::default(),
                    next_handle: 0,
                }),
                config: self.config,
                relationships: self.relationships,
                resolver_cache: ResolverCache::default(),
                scheduler: self.scheduler,
            }),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::builder().build()
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder {
            config: StoreConfig::default(),
            relationships: no_subtypes(),
            scheduler: Arc::new(ImmediateScheduler),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn lookup(&self, selector: &Selector) -> Snapshot {
        let state = self.inner.state.lock();
        self.inner.read(&state, selector)
    }

    /// Calls `callback` with the new snapshot whenever a publication changes what `selector`
    /// reads. Dropping the subscription stops the notifications.
    pub fn subscribe(
        &self,
        selector: &Selector,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let mut state = self.inner.state.lock();
        let snapshot = self.inner.read(&state, selector);
        let id = state.next_handle();
        state.subscriptions.insert(
            id,
            SubscriptionEntry {
                snapshot,
                callback: Arc::new(callback),
            },
        );
        tracing::debug!(subscription = id, node = %selector.node.name, "subscribed");
        Subscription::new(self.downgrade(), id)
    }

    /// Keeps the data of `operation` from being collected until the handle is dropped.
    pub fn retain(&self, operation: &OperationDescriptor) -> RetainHandle {
        let identifier = self.inner.state.lock().gc.retain(operation);
        RetainHandle::new(self.downgrade(), identifier)
    }

    /// Whether everything `selector` selects is cached.
    pub fn check(&self, selector: &Selector) -> bool {
        let state = self.inner.state.lock();
        let source = state.queue.source();
        Differ::new(&source, self.inner.relationships.as_ref())
            .with_id_field(&self.inner.config.id_field)
            .check(selector)
    }

    /// The part of `selector` that is not cached yet, `None` when nothing is missing.
    pub fn diff(&self, selector: &Selector) -> Option<Selector> {
        let state = self.inner.state.lock();
        let source = state.queue.source();
        Differ::new(&source, self.inner.relationships.as_ref())
            .with_id_field(&self.inner.config.id_field)
            .diff(selector)
    }

    pub fn availability(&self, operation: &OperationDescriptor) -> Availability {
        let state = self.inner.state.lock();
        let root = state.gc.root(operation.identifier());
        let written_at = root.and_then(|root| root.epoch);
        let fetch_time = root.and_then(|root| root.fetch_time);
        let is_stale_since = |epoch: u64| match written_at {
            Some(written_at) => epoch >= written_at,
            None => true,
        };

        if state.queue.invalidation_epoch().is_some_and(is_stale_since) {
            return Availability::Stale;
        }

        let snapshot = self.inner.read(&state, &operation.root);
        let source = state.queue.source();
        let invalidated = snapshot
            .seen_records
            .iter()
            .filter_map(|id| source.record(id)?.invalidated_at())
            .max();
        if invalidated.is_some_and(is_stale_since) {
            return Availability::Stale;
        }
        if snapshot.is_missing_data {
            return Availability::Missing;
        }

        let expired = self
            .inner
            .config
            .query_cache_expiration
            .zip(fetch_time)
            .is_some_and(|(expiration, fetch_time)| fetch_time.elapsed() > expiration);
        if expired {
            return Availability::Stale;
        }

        Availability::Available { fetch_time }
    }

    /// Writes the initial payload of `operation`. Deferred and streamed parts it announces can
    /// then be committed with [`Store::commit_incremental_payload`].
    ///
    /// The report tells what readers of `operation` will miss from this payload: `@required`
    /// fields it left out and server errors nothing catches.
    pub fn commit_payload(
        &self,
        operation: &OperationDescriptor,
        payload: &ResponsePayload,
    ) -> Result<WriteReport, StoreError> {
        self.commit_payload_with_updater(operation, payload, None)
    }

    /// Writes a mutation payload and runs `updater` on top of it in the same batch.
    pub fn commit_payload_with_updater(
        &self,
        operation: &OperationDescriptor,
        payload: &ResponsePayload,
        updater: Option<Updater>,
    ) -> Result<WriteReport, StoreError> {
        self.publish_commit(|state| {
            let committed = state
                .queue
                .commit_payload_with_updater(&operation.root, payload, updater)?;
            state.incremental.reset(operation.identifier(), committed.placeholders);
            Ok(committed.report)
        })
    }

    /// Writes a `@defer` or `@stream` follow-up of `operation` where its placeholder points.
    pub fn commit_incremental_payload(
        &self,
        operation: &OperationDescriptor,
        payload: &ResponsePayload,
    ) -> Result<WriteReport, StoreError> {
        let (Some(label), Some(path)) = (&payload.label, &payload.path) else {
            return Err(StoreError::NotIncremental);
        };

        self.publish_commit(|state| {
            let placeholder = state
                .incremental
                .take(operation.identifier(), label, path)
                .ok_or_else(|| StoreError::UnknownIncrementalPlaceholder {
                    label: label.clone(),
                    path: display_path(path),
                })?;

            let result = normalize_incremental(&state.queue, &placeholder, payload, path)?;
            let report = state.queue.validate(&operation.root, &result);
            state.incremental.extend(operation.identifier(), result.placeholders);
            state.queue.commit_source(operation.root.clone(), result.source, None);
            Ok(report)
        })
    }

    /// Runs a local update. Nothing it did is kept if it fails.
    pub fn commit_update(&self, updater: Updater) -> Result<(), StoreError> {
        self.publish_commit(|state| {
            state.queue.commit_update(updater);
            Ok(())
        })
    }

    /// Returns false when `token` is already applied.
    pub fn apply_optimistic(&self, token: OptimisticToken, update: OptimisticUpdate) -> bool {
        self.publish_infallible(|state| state.queue.apply_optimistic(token, update))
    }

    pub fn revert_optimistic(&self, token: &OptimisticToken) -> bool {
        self.publish_infallible(|state| state.queue.revert_optimistic(token))
    }

    /// Marks everything currently cached as stale.
    pub fn invalidate_store(&self) {
        self.publish_infallible(|state| state.queue.invalidate_store());
    }

    /// Pauses garbage collection until the hold is dropped.
    pub fn hold_gc(&self) -> GcHold {
        self.inner.state.lock().gc.hold();
        GcHold::new(self.downgrade())
    }

    /// Declares a request in flight until the handle is dropped. Collection keeps what its
    /// selections reach, with a warning.
    pub fn track_fetch(&self, operation: &OperationDescriptor) -> FetchHandle {
        let mut state = self.inner.state.lock();
        let fetch = state.next_handle();
        state
            .gc
            .track_fetch(fetch, operation.identifier(), operation.root.clone());
        FetchHandle::new(self.downgrade(), fetch, operation.identifier().to_string())
    }

    /// Runs a whole collection right away, unless it is held.
    pub fn collect(&self) -> Option<GcOutcome> {
        let outcome = {
            let mut state = self.inner.state.lock();
            let state = &mut *state;
            state.gc.collect(&mut state.queue)?
        };
        self.inner.after_collection(&outcome);
        Some(outcome)
    }

    /// Number of retained operations whose selections reached `id` in the last collection.
    /// Dropping a [`RetainHandle`] is only reflected here once a collection has run.
    pub fn reference_count(&self, id: &DataId) -> usize {
        self.inner.state.lock().gc.reference_count(id)
    }

    /// Live [`RetainHandle`]s on `operation`.
    pub fn retain_count(&self, operation: &OperationDescriptor) -> usize {
        self.inner.state.lock().gc.retain_count(operation.identifier())
    }

    /// A copy of what readers currently see.
    pub fn source(&self) -> InMemorySource {
        self.inner.state.lock().queue.materialize()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.state.lock().queue.epoch()
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    /// Applies `mutation` and publishes it. Subscribers are notified and collection is scheduled
    /// after the lock is released. Returns the updates the queue rejected while running.
    fn publish<T, E>(
        &self,
        mutation: impl FnOnce(&mut StoreState) -> Result<T, E>,
    ) -> Result<(T, Vec<UpdateError>), E> {
        let (output, notifications, collect, rejected) = {
            let mut state = self.inner.state.lock();
            let output = mutation(&mut state)?;
            let result = state.queue.run();
            let (notifications, collect) = self.inner.after_run(&mut state, &result);
            (output, notifications, collect, result.rejected)
        };

        for (callback, snapshot) in notifications {
            callback(&snapshot);
        }
        if collect {
            self.inner.schedule_gc(self.downgrade());
        }

        Ok((output, rejected))
    }

    /// Publishes a commit, failing with the first update the queue rejected.
    fn publish_commit<T>(
        &self,
        mutation: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let (output, rejected) = self.publish(mutation)?;
        match rejected.into_iter().next() {
            Some(error) => Err(StoreError::Update(error)),
            None => Ok(output),
        }
    }

    /// Publishes a change that can't be rejected.
    fn publish_infallible<T>(&self, mutation: impl FnOnce(&mut StoreState) -> T) -> T {
        match self.publish(|state| Ok::<_, Infallible>(mutation(state))) {
            Ok((output, _)) => output,
            Err(never) => match never {},
        }
    }
}

impl StoreState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl StoreInner {
    fn read(&self, state: &StoreState, selector: &Selector) -> Snapshot {
        let source = state.queue.source();
        Reader::new(&source, self.relationships.as_ref(), &self.resolver_cache)
            .log_required_field_errors(self.config.log_required_field_errors)
            .read(selector)
    }

    /// Collected records can't be read anymore, so neither can what resolvers derived from them.
    fn after_collection(&self, outcome: &GcOutcome) {
        let evicted = self.resolver_cache.invalidate(&outcome.collected);
        if evicted > 0 {
            tracing::debug!(evicted, "resolver outputs of collected records dropped");
        }
    }

    /// Bookkeeping after a publication. Returns the subscriptions to notify and whether a
    /// collection should be scheduled.
    fn after_run(&self, state: &mut StoreState, result: &RunResult) -> (Vec<(Callback, Snapshot)>, bool) {
        let evicted = self.resolver_cache.invalidate(&result.updated_ids);
        if evicted > 0 {
            tracing::debug!(evicted, "resolver outputs invalidated");
        }

        let epoch = state.queue.epoch();
        let now = Instant::now();
        let mut collect = false;
        for selector in &result.committed {
            collect |= state.gc.note_write(selector, epoch, now);
        }

        if result.updated_ids.is_empty() {
            return (Vec::new(), collect);
        }

        let affected = state
            .subscriptions
            .iter()
            .filter(|(_, entry)| entry.snapshot.touches(&result.updated_ids))
            .map(|(id, entry)| (*id, entry.snapshot.selector.clone()))
            .collect::<Vec<_>>();

        let mut notifications = Vec::new();
        for (id, selector) in affected {
            let snapshot = self.read(state, &selector);
            let Some(entry) = state.subscriptions.get_mut(&id) else {
                continue;
            };
            if entry.snapshot.has_same_content(&snapshot) {
                entry.snapshot = snapshot;
                continue;
            }
            entry.snapshot = snapshot.clone();
            notifications.push((Arc::clone(&entry.callback), snapshot));
        }

        tracing::debug!(
            updated = result.updated_ids.len(),
            notified = notifications.len(),
            "notifying subscriptions"
        );
        (notifications, collect)
    }

    fn schedule_gc(&self, store: Weak<StoreInner>) {
        self.scheduler.schedule(GcTask { store });
    }
}
