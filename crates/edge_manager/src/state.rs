//! The runner's cached pipeline state and its persistence.

use crate::error::RunnerError;
use edge_protocol::{PipelineState, PipelineStatus};
use edge_state_store::StateStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Shared between a runner and its loop thread. Every change is persisted
/// before the cached copy is replaced, so a failed save leaves both as they
/// were.
#[derive(Clone)]
pub(crate) struct StateHandle {
    store: Arc<StateStore>,
    current: Arc<Mutex<PipelineState>>,
}

impl StateHandle {
    pub(crate) fn new(store: Arc<StateStore>, state: PipelineState) -> Self {
        Self {
            store,
            current: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current(&self) -> PipelineState {
        self.lock().clone()
    }

    pub(crate) fn status(&self) -> PipelineStatus {
        self.lock().status
    }

    /// Moves to `to` if the transition table allows it.
    pub(crate) fn transition(
        &self,
        to: PipelineStatus,
        message: Option<String>,
        update: impl FnOnce(&mut PipelineState),
    ) -> Result<PipelineState, RunnerError> {
        let mut current = self.lock();
        let mut next = current.transition(to, message)?;
        update(&mut next);
        self.persist(&mut current, next)
    }

    /// Moves to `to` regardless of the table. Only for recovery.
    pub(crate) fn force(
        &self,
        to: PipelineStatus,
        message: Option<String>,
    ) -> Result<PipelineState, RunnerError> {
        let mut current = self.lock();
        let next = current.forced(to, message);
        self.persist(&mut current, next)
    }

    /// Changes attributes without a status change.
    pub(crate) fn update(
        &self,
        update: impl FnOnce(&mut PipelineState),
    ) -> Result<PipelineState, RunnerError> {
        let mut current = self.lock();
        let mut next = current.clone();
        update(&mut next);
        self.persist(&mut current, next)
    }

    fn persist(
        &self,
        current: &mut MutexGuard<'_, PipelineState>,
        next: PipelineState,
    ) -> Result<PipelineState, RunnerError> {
        self.store.save_state(&next)?;
        if current.status != next.status {
            info!(
                pipeline = %next.pipeline_id,
                from = %current.status,
                to = %next.status,
                message = next.message.as_deref().unwrap_or(""),
                "Pipeline state changed"
            );
        }
        **current = next.clone();
        Ok(next)
    }
}
