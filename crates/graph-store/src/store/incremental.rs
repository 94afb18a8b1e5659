use fnv::FnvHashMap;

use crate::{
    error::NormalizationError,
    normalizer::{IncrementalPlaceholder, NormalizationResult, Normalizer},
    payload::{PathSegment, ResponsePayload},
    publish_queue::PublishQueue,
};

/// Placeholders left by the payloads of each request, by request identifier.
#[derive(Debug, Default)]
pub(super) struct IncrementalTracker {
    requests: FnvHashMap<String, Vec<IncrementalPlaceholder>>,
}

impl IncrementalTracker {
    /// A new initial payload for `request` supersedes whatever its previous one left.
    pub fn reset(&mut self, request: &str, placeholders: Vec<IncrementalPlaceholder>) {
        if placeholders.is_empty() {
            self.requests.remove(request);
        } else {
            self.requests.insert(request.to_string(), placeholders);
        }
    }

    pub fn extend(&mut self, request: &str, placeholders: Vec<IncrementalPlaceholder>) {
        if !placeholders.is_empty() {
            self.requests.entry(request.to_string()).or_default().extend(placeholders);
        }
    }

    pub fn clear(&mut self, request: &str) {
        self.requests.remove(request);
    }

    /// Finds the placeholder a follow-up payload at `label`/`path` belongs to. Deferred
    /// placeholders are consumed, streams stay until the request is done.
    pub fn take(&mut self, request: &str, label: &str, path: &[PathSegment]) -> Option<IncrementalPlaceholder> {
        let placeholders = self.requests.get_mut(request)?;
        let position = placeholders.iter().position(|placeholder| match placeholder {
            IncrementalPlaceholder::Defer {
                label: expected,
                path: at,
                ..
            } => expected == label && at == path,
            IncrementalPlaceholder::Stream {
                label: expected,
                path: at,
                ..
            } => {
                expected == label
                    && matches!(path.split_last(), Some((PathSegment::Index(_), parent)) if parent == at.as_slice())
            }
        })?;

        if matches!(placeholders[position], IncrementalPlaceholder::Defer { .. }) {
            Some(placeholders.remove(position))
        } else {
            Some(placeholders[position].clone())
        }
    }
}

/// Normalizes a follow-up payload into the record its placeholder points at.
pub(super) fn normalize_incremental(
    queue: &PublishQueue,
    placeholder: &IncrementalPlaceholder,
    payload: &ResponsePayload,
    path: &[PathSegment],
) -> Result<NormalizationResult, NormalizationError> {
    let normalizer = Normalizer::new(queue.relationships(), queue.options())
        .with_errors(&payload.errors)
        .with_path(path.to_vec());

    match placeholder {
        IncrementalPlaceholder::Defer { selector, typename, .. } => {
            normalizer.normalize(selector, typename, payload.data.as_ref())
        }
        IncrementalPlaceholder::Stream {
            parent_id,
            typename,
            field,
            variables,
            ..
        } => {
            let index = match path.last() {
                Some(PathSegment::Index(index)) => *index,
                _ => 0,
            };
            normalizer.normalize_stream_item(
                &queue.source(),
                parent_id,
                typename,
                field,
                variables,
                index,
                payload.data.as_ref(),
            )
        }
    }
}
