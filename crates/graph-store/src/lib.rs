//! A normalized client-side cache for GraphQL responses.
//!
//! Response payloads are flattened into records keyed by identity, which every query reads from
//! through its compiled selection tree. Writes funnel through a [`PublishQueue`] that layers
//! optimistic updates on top of the committed data, and a [`GarbageCollector`] removes records
//! no retained operation can reach anymore. [`Store`] ties everything together behind a single
//! lock and notifies subscribers whose data changed.

mod config;
mod differ;
mod error;
mod gc;
mod identity;
mod normalizer;
mod payload;
mod proxy;
mod publish_queue;
mod reader;
mod record;
mod resolver;
pub mod selection;
mod selector;
mod snapshot;
pub mod source;
mod store;
mod type_relationships;

pub use config::StoreConfig;
pub use differ::{diff, Differ};
pub use error::{
    FieldError, FieldErrorKind, GcSafetyWarning, NormalizationError, ReadError, RequiredFieldError, StoreError,
    UpdateError,
};
pub use gc::{GarbageCollector, GcOutcome, GcProgress};
pub use identity::{DataId, ROOT_ID, ROOT_TYPE};
pub use normalizer::{normalize, IncrementalPlaceholder, NormalizationResult, NormalizeOptions, Normalizer, WriteReport};
pub use payload::{PathSegment, PayloadError, ResponsePayload};
pub use proxy::{RecordSourceProxy, Updater};
pub use publish_queue::{CommittedPayload, OptimisticToken, OptimisticUpdate, PublishQueue, RunResult};
pub use reader::{read, Reader};
pub use record::{FieldValue, Record};
pub use resolver::{Resolver, ResolverCache, ResolverError, ResolverInput};
pub use selector::{OperationDescriptor, RequestDescriptor, Selector, FRAGMENTS_KEY, FRAGMENT_ID_KEY};
pub use snapshot::{MissingRequiredFields, Snapshot};
pub use store::{
    Availability, FetchHandle, GcHold, GcScheduler, GcTask, ImmediateScheduler, ManualScheduler, RetainHandle, Store,
    StoreBuilder, Subscription,
};
pub use type_relationships::{no_subtypes, PossibleTypes, TypeRelationships};

#[cfg(test)]
#[ctor::ctor]
fn setup_logging() {
    let filter = tracing_subscriber::filter::EnvFilter::builder()
        .parse(std::env::var("RUST_LOG").unwrap_or("graph_store=debug".to_string()))
        .unwrap();
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .without_time()
        .with_test_writer()
        .init();
}
