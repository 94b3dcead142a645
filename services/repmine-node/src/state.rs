use repmine_core::{ProofOracle, VersionedStore};
use repmine_scheduler::SchedulerState;
use std::sync::Arc;
use tokio::sync::watch;

pub struct AppState {
    pub store: Arc<VersionedStore>,
    pub oracle: ProofOracle,
    /// Absent when the node runs without automatic submission.
    pub scheduler: Option<watch::Receiver<SchedulerState>>,
}

impl AppState {
    pub fn new(
        store: Arc<VersionedStore>,
        scheduler: Option<watch::Receiver<SchedulerState>>,
    ) -> Self {
        Self {
            oracle: ProofOracle::new(store.clone()),
            store,
            scheduler,
        }
    }

    pub fn scheduler_state(&self) -> Option<SchedulerState> {
        self.scheduler.as_ref().map(|rx| rx.borrow().clone())
    }
}
