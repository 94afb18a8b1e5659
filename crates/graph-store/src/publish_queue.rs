//! Sequences every mutation of the graph.
//!
//! Commits and optimistic updates are only queued until [`PublishQueue::run`], which applies the
//! base commits one by one, rebases the optimistic layers on the new base and reports which
//! identities changed in the composed view.

use std::{fmt, sync::Arc};

use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;

use crate::{
    error::{NormalizationError, UpdateError},
    identity::DataId,
    normalizer::{root_typename, IncrementalPlaceholder, NormalizationResult, NormalizeOptions, Normalizer, WriteReport},
    payload::ResponsePayload,
    proxy::{RecordSourceProxy, Updater},
    record::Record,
    selector::Selector,
    source::{InMemorySource, LayeredSource, MutableRecordSource, RecordSource},
    type_relationships::TypeRelationships,
};

/// Identifies an optimistic update so that it can be reverted, and applied only once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptimisticToken(String);

impl OptimisticToken {
    pub fn new(token: impl Into<String>) -> Self {
        OptimisticToken(token.into())
    }
}

impl From<&str> for OptimisticToken {
    fn from(value: &str) -> Self {
        OptimisticToken::new(value)
    }
}

impl fmt::Display for OptimisticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What committing a payload left behind.
#[derive(Debug, Default)]
pub struct CommittedPayload {
    /// `@defer`/`@stream` branches whose data will come in follow-up payloads.
    pub placeholders: Vec<IncrementalPlaceholder>,
    pub report: WriteReport,
}

/// A provisional change: an expected server response, a local updater, or both.
#[derive(Clone, Default)]
pub struct OptimisticUpdate {
    pub response: Option<(Selector, ResponsePayload)>,
    pub updater: Option<Updater>,
}

impl OptimisticUpdate {
    pub fn response(selector: Selector, payload: ResponsePayload) -> Self {
        OptimisticUpdate {
            response: Some((selector, payload)),
            updater: None,
        }
    }

    pub fn updater(updater: Updater) -> Self {
        OptimisticUpdate {
            response: None,
            updater: Some(updater),
        }
    }

    pub fn with_updater(mut self, updater: Updater) -> Self {
        self.updater = Some(updater);
        self
    }

    fn apply(&self, proxy: &mut RecordSourceProxy<'_>) -> Result<(), UpdateError> {
        if let Some((selector, payload)) = &self.response {
            proxy.publish_payload(selector, payload)?;
        }
        if let Some(updater) = &self.updater {
            updater(proxy)?;
        }
        Ok(())
    }
}

impl fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticUpdate")
            .field("response", &self.response)
            .field("updater", &self.updater.is_some())
            .finish()
    }
}

enum Commit {
    Payload {
        selector: Selector,
        source: InMemorySource,
        updater: Option<Updater>,
    },
    Update(Updater),
    InvalidateStore,
}

impl Commit {
    fn apply(&self, proxy: &mut RecordSourceProxy<'_>) -> Result<(), UpdateError> {
        match self {
            Commit::Payload { source, updater, .. } => {
                proxy.publish_source(source);
                if let Some(updater) = updater {
                    updater(proxy)?;
                }
                Ok(())
            }
            Commit::Update(updater) => updater(proxy),
            Commit::InvalidateStore => Ok(()),
        }
    }
}

struct OptimisticLayer {
    token: OptimisticToken,
    update: OptimisticUpdate,
    sink: InMemorySource,
}

#[derive(Debug, Default)]
pub struct RunResult {
    /// Identities whose record in the composed view differs from before the run.
    pub updated_ids: FnvHashSet<DataId>,
    /// Selectors of the payloads that were committed, in order.
    pub committed: Vec<Selector>,
    pub rejected: Vec<UpdateError>,
    pub invalidated_store: bool,
}

pub struct PublishQueue {
    base: InMemorySource,
    relationships: Arc<dyn TypeRelationships>,
    options: NormalizeOptions,
    pending: Vec<Commit>,
    layers: Vec<OptimisticLayer>,
    layers_changed: bool,
    epoch: u64,
    invalidation_epoch: Option<u64>,
}

impl PublishQueue {
    pub fn new(relationships: Arc<dyn TypeRelationships>, options: NormalizeOptions) -> Self {
        PublishQueue {
            base: InMemorySource::new(),
            relationships,
            options,
            pending: Vec::new(),
            layers: Vec::new(),
            layers_changed: false,
            epoch: 0,
            invalidation_epoch: None,
        }
    }

    /// Normalizes `payload` right away, so that a payload contradicting its selection is rejected
    /// here without ever reaching the base.
    pub fn commit_payload(
        &mut self,
        selector: &Selector,
        payload: &ResponsePayload,
    ) -> Result<CommittedPayload, NormalizationError> {
        self.commit_payload_with_updater(selector, payload, None)
    }

    /// Like [`PublishQueue::commit_payload`], running `updater` on top of the payload in the
    /// same batch.
    pub fn commit_payload_with_updater(
        &mut self,
        selector: &Selector,
        payload: &ResponsePayload,
        updater: Option<Updater>,
    ) -> Result<CommittedPayload, NormalizationError> {
        let typename = self.typename_of(selector);
        let result = Normalizer::new(self.relationships.as_ref(), &self.options)
            .with_errors(&payload.errors)
            .with_path(payload.path.clone().unwrap_or_default())
            .normalize(selector, &typename, payload.data.as_ref())?;

        let report = self.validate(selector, &result);
        self.commit_source(selector.clone(), result.source, updater);
        Ok(CommittedPayload {
            placeholders: result.placeholders,
            report,
        })
    }

    /// Reads `selector` as it will be once `result` is committed, logging what its readers will
    /// miss.
    #[tracing::instrument(skip_all, fields(node = %selector.node.name))]
    pub(crate) fn validate(&self, selector: &Selector, result: &NormalizationResult) -> WriteReport {
        let report = result.validate(selector, &self.base, self.relationships.as_ref());
        if let Some(missing) = &report.missing_required_fields {
            let paths = missing.fields.iter().map(|field| field.path.as_str()).join(", ");
            tracing::warn!(action = %missing.action, %paths, "payload is missing required fields");
        }
        if !report.errors.is_empty() {
            tracing::debug!(errors = report.errors.len(), "payload carries uncaught field errors");
        }
        report
    }

    /// Queues an already normalized batch.
    pub(crate) fn commit_source(&mut self, selector: Selector, source: InMemorySource, updater: Option<Updater>) {
        self.pending.push(Commit::Payload {
            selector,
            source,
            updater,
        });
    }

    pub fn commit_update(&mut self, updater: Updater) {
        self.pending.push(Commit::Update(updater));
    }

    /// Marks all data currently in the store as stale.
    pub fn invalidate_store(&mut self) {
        self.pending.push(Commit::InvalidateStore);
    }

    /// Queues an optimistic layer. Returns false, and changes nothing, when `token` is already
    /// applied.
    pub fn apply_optimistic(&mut self, token: OptimisticToken, update: OptimisticUpdate) -> bool {
        if self.layers.iter().any(|layer| layer.token == token) {
            tracing::warn!(%token, "optimistic update already applied");
            return false;
        }
        self.layers.push(OptimisticLayer {
            token,
            update,
            sink: InMemorySource::new(),
        });
        self.layers_changed = true;
        true
    }

    /// Drops the layer of `token`. Later layers are rebased on the next run.
    pub fn revert_optimistic(&mut self, token: &OptimisticToken) -> bool {
        let before = self.layers.len();
        self.layers.retain(|layer| layer.token != *token);
        let removed = self.layers.len() != before;
        if removed {
            self.layers_changed = true;
        } else {
            tracing::debug!(%token, "no optimistic update to revert");
        }
        removed
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.layers_changed
    }

    /// Makes everything queued observable.
    #[tracing::instrument(skip_all, fields(commits = self.pending.len(), layers = self.layers.len()))]
    pub fn run(&mut self) -> RunResult {
        let mut result = RunResult::default();
        if !self.has_pending() {
            return result;
        }

        self.epoch += 1;
        let epoch = self.epoch;

        let mut previous_base = FnvHashMap::default();
        for commit in std::mem::take(&mut self.pending) {
            let mut sink = InMemorySource::new();
            let outcome = {
                let mut proxy =
                    RecordSourceProxy::new(&self.base, &mut sink, self.relationships.as_ref(), &self.options)
                        .with_epoch(epoch);
                commit.apply(&mut proxy)
            };

            if let Err(error) = outcome {
                tracing::warn!(%error, "rejected commit");
                result.rejected.push(error);
                continue;
            }

            for (id, entry) in sink.entries() {
                previous_base
                    .entry(id.clone())
                    .or_insert_with(|| self.base.get(id).detach());
                self.base.restore(id.clone(), entry.detach());
            }

            match commit {
                Commit::Payload { selector, .. } => result.committed.push(selector),
                Commit::InvalidateStore => {
                    self.invalidation_epoch = Some(epoch);
                    result.invalidated_store = true;
                }
                Commit::Update(_) => {}
            }
        }

        let previous_layers = if self.layers_changed || (!previous_base.is_empty() && !self.layers.is_empty()) {
            Some(self.rebase(epoch))
        } else {
            None
        };
        self.layers_changed = false;

        let mut candidates = previous_base.keys().cloned().collect::<FnvHashSet<_>>();
        if let Some(previous_layers) = &previous_layers {
            for layer in previous_layers {
                candidates.extend(layer.ids().cloned());
            }
            for layer in &self.layers {
                candidates.extend(layer.sink.ids().cloned());
            }
        }

        for id in candidates {
            let base_before = previous_base
                .get(&id)
                .cloned()
                .unwrap_or_else(|| self.base.get(&id).detach());
            let before = match &previous_layers {
                Some(layers) => lookup(&id, layers.iter(), base_before),
                None => lookup(&id, self.layers.iter().map(|layer| &layer.sink), base_before),
            };
            let after = lookup(
                &id,
                self.layers.iter().map(|layer| &layer.sink),
                self.base.get(&id).detach(),
            );
            if before != after {
                result.updated_ids.insert(id);
            }
        }

        tracing::debug!(
            epoch,
            updated = result.updated_ids.len(),
            rejected = result.rejected.len(),
            "published"
        );
        result
    }

    /// Replays every layer on top of the base and the layers before it. Returns the previous
    /// layer contents.
    fn rebase(&mut self, epoch: u64) -> Vec<InMemorySource> {
        let mut previous = Vec::with_capacity(self.layers.len());
        for index in 0..self.layers.len() {
            let (applied, rest) = self.layers.split_at_mut(index);
            let Some(layer) = rest.first_mut() else {
                break;
            };

            let composed = LayeredSource::with_overlays(
                &self.base,
                applied.iter().map(|layer| &layer.sink as &dyn RecordSource),
            );
            let mut sink = InMemorySource::new();
            let outcome = {
                let mut proxy = RecordSourceProxy::new(&composed, &mut sink, self.relationships.as_ref(), &self.options)
                    .with_epoch(epoch);
                layer.update.apply(&mut proxy)
            };
            if let Err(error) = outcome {
                tracing::warn!(token = %layer.token, %error, "optimistic update failed, its layer is empty");
                sink.clear();
            }

            previous.push(std::mem::replace(&mut layer.sink, sink));
        }
        previous
    }

    /// The base with every optimistic layer on top: what readers see.
    pub fn source(&self) -> LayeredSource<'_> {
        LayeredSource::with_overlays(
            &self.base,
            self.layers.iter().map(|layer| &layer.sink as &dyn RecordSource),
        )
    }

    /// Copies the composed view into a standalone source.
    pub fn materialize(&self) -> InMemorySource {
        let composed = self.source();
        let mut materialized = InMemorySource::new();
        for id in composed.ids() {
            materialized.restore(id.clone(), composed.get(id).detach());
        }
        materialized
    }

    pub fn base(&self) -> &InMemorySource {
        &self.base
    }

    /// Identities written by optimistic layers, which count as retained until reverted.
    pub(crate) fn optimistic_ids(&self) -> impl Iterator<Item = &DataId> + '_ {
        self.layers.iter().flat_map(|layer| layer.sink.ids())
    }

    /// Removes every base record `keep` rejects and returns their identities.
    pub(crate) fn sweep(&mut self, keep: impl Fn(&DataId) -> bool) -> FnvHashSet<DataId> {
        let doomed = self.base.ids().filter(|id| !keep(id)).cloned().collect::<FnvHashSet<_>>();
        for id in &doomed {
            self.base.remove(id);
        }
        doomed
    }

    /// Write epoch of the last run.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Epoch of the last store-wide invalidation.
    pub fn invalidation_epoch(&self) -> Option<u64> {
        self.invalidation_epoch
    }

    pub(crate) fn relationships(&self) -> &dyn TypeRelationships {
        self.relationships.as_ref()
    }

    pub(crate) fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    /// Typename of the record `selector` writes into, as far as the composed view knows.
    pub(crate) fn typename_of(&self, selector: &Selector) -> String {
        match self.source().record(&selector.data_id) {
            Some(record) => record.typename().to_string(),
            None => root_typename(selector).to_string(),
        }
    }
}

fn lookup<'a>(
    id: &DataId,
    layers: impl DoubleEndedIterator<Item = &'a InMemorySource>,
    base: Option<Option<Arc<Record>>>,
) -> Option<Option<Arc<Record>>> {
    for layer in layers.rev() {
        if let Some(entry) = layer.get(id).detach() {
            return Some(entry);
        }
    }
    base
}
