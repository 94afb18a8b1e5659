use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use super::StoreInner;
use crate::gc::GcProgress;

/// Decides when the slices of a garbage collection run.
pub trait GcScheduler: Send + Sync {
    /// Called outside of the store lock whenever collection became necessary.
    fn schedule(&self, task: GcTask);
}

/// A pending collection of one store. Each [`GcTask::step`] holds the store lock for one bounded
/// slice of marking, or for the final sweep.
#[derive(Clone)]
pub struct GcTask {
    pub(super) store: Weak<StoreInner>,
}

impl GcTask {
    pub fn step(&self) -> GcProgress {
        let Some(store) = self.store.upgrade() else {
            return GcProgress::Idle;
        };
        let progress = {
            let mut state = store.state.lock();
            let state = &mut *state;
            state.gc.step(&mut state.queue)
        };
        if let GcProgress::Done(outcome) = &progress {
            store.after_collection(outcome);
        }
        progress
    }
}

/// Runs collection to completion as soon as it is scheduled.
#[derive(Debug, Default)]
pub struct ImmediateScheduler;

impl GcScheduler for ImmediateScheduler {
    fn schedule(&self, task: GcTask) {
        while task.step() == GcProgress::Pending {}
    }
}

/// Queues collection slices until the host runs them.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<VecDeque<GcTask>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualScheduler::default())
    }

    /// Runs one slice of the oldest task. A task with work left goes back to the front.
    pub fn run_next(&self) -> Option<GcProgress> {
        let task = self.tasks.lock().pop_front()?;
        let progress = task.step();
        if progress == GcProgress::Pending {
            self.tasks.lock().push_front(task);
        }
        Some(progress)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GcScheduler for ManualScheduler {
    fn schedule(&self, task: GcTask) {
        self.tasks.lock().push_back(task);
    }
}
