#![allow(unused_crate_dependencies, clippy::panic)]

mod boundaries;
mod diff;
mod gc;
mod incremental;
mod optimistic;
mod scenario;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use graph_store::{
    selection::{LinkedField, Operation, ScalarField, Selection},
    OperationDescriptor, ResponsePayload, Snapshot, Store, StoreConfig,
};
use serde_json::Value;

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

fn query(name: &str, selections: Vec<Selection>) -> OperationDescriptor {
    OperationDescriptor::new(Arc::new(Operation::query(name, selections)), Default::default())
}

fn user(field: &str, selections: Vec<Selection>) -> Selection {
    LinkedField::new(field, selections).concrete_type("User").into()
}

fn scalars(names: &[&str]) -> Vec<Selection> {
    names.iter().map(|name| ScalarField::new(*name).into()).collect()
}

/// `query MeQuery { me { id name } }`
fn me_query() -> OperationDescriptor {
    query("MeQuery", vec![user("me", scalars(&["id", "name"]))])
}

fn store_without_release_buffer() -> Store {
    Store::builder()
        .config(StoreConfig {
            gc_release_buffer_size: 0,
            ..Default::default()
        })
        .build()
}

fn commit(store: &Store, operation: &OperationDescriptor, data: Value) {
    store
        .commit_payload(operation, &ResponsePayload::from_data(data))
        .unwrap();
}

fn data(store: &Store, operation: &OperationDescriptor) -> Option<Value> {
    store.lookup(&operation.root).data
}

#[derive(Clone, Default)]
struct Notifications(Arc<AtomicUsize>);

impl Notifications {
    fn callback(&self) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let count = Arc::clone(&self.0);
        move |_: &Snapshot| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
