//! Exclusive leases over a single run's mutable state
//!
//! A [`WorkflowLease`] owns the run's mutex guard, so while it is alive no
//! other task can observe or mutate that run. Changes made through the lease
//! become visible to storage only on [`WorkflowLease::commit`]; dropping a
//! lease without committing rolls the in-memory state back to what it was at
//! acquisition.

use crate::error::EngineResult;
use crate::models::execution::{CurrentExecution, ExecutionKey, WorkflowIdentity};
use crate::models::mutable_state::MutableState;
use crate::workflow::action::{ActionDirective, UpdateWorkflowAction};
use crate::workflow::persistence::ExecutionPersistence;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Scoped, exclusive handle on one run
pub struct WorkflowLease {
    identity: WorkflowIdentity,
    guard: OwnedMutexGuard<MutableState>,
    /// State at acquisition, restored if the lease is dropped uncommitted
    snapshot: Option<MutableState>,
    current: Arc<DashMap<ExecutionKey, CurrentExecution>>,
    persistence: Arc<dyn ExecutionPersistence>,
}

impl WorkflowLease {
    pub(crate) fn new(
        guard: OwnedMutexGuard<MutableState>,
        current: Arc<DashMap<ExecutionKey, CurrentExecution>>,
        persistence: Arc<dyn ExecutionPersistence>,
    ) -> Self {
        let identity = guard.identity().clone();
        let snapshot = Some(guard.clone());
        Self {
            identity,
            guard,
            snapshot,
            current,
            persistence,
        }
    }

    pub fn identity(&self) -> &WorkflowIdentity {
        &self.identity
    }

    /// Run ID, state, status and start request of the leased run
    pub fn current(&self) -> CurrentExecution {
        self.guard.current_execution()
    }

    pub fn mutable_state(&self) -> &MutableState {
        &self.guard
    }

    pub fn mutable_state_mut(&mut self) -> &mut MutableState {
        &mut self.guard
    }

    /// Apply an action to the leased run. The action is consumed.
    pub fn apply(&mut self, action: UpdateWorkflowAction) -> EngineResult<ActionDirective> {
        action.apply(&mut self.guard)
    }

    /// Persist the changes made under this lease, then release it.
    ///
    /// The current-run pointer is refreshed only after storage accepted the
    /// write, so no other start can observe a close that was never persisted.
    ///
    /// A [`ActionDirective::Noop`] commit writes nothing and releases the lease
    /// like [`release`](Self::release): edits made through
    /// [`mutable_state_mut`](Self::mutable_state_mut) are rolled back. On a
    /// storage error the run is likewise restored to its state at acquisition.
    pub async fn commit(mut self, directive: ActionDirective) -> EngineResult<()> {
        if directive.is_noop() {
            if self.snapshot.as_ref() != Some(&*self.guard) {
                tracing::debug!(
                    run = %self.identity,
                    "No-op commit of a modified run, changes will be discarded"
                );
            }
            return Ok(());
        }
        if directive.creates_workflow_task() {
            self.guard.schedule_workflow_task();
        }
        self.guard.bump_version();

        let key = self.identity.key();
        let is_current = self
            .current
            .get(&key)
            .map(|c| c.run_id == self.identity.run_id)
            .unwrap_or(false);

        if let Err(err) = self.persistence.save(&self.guard, is_current).await {
            tracing::error!(run = %self.identity, error = %err, "Failed to commit execution");
            return Err(err.into());
        }

        if is_current {
            if let Some(mut pointer) = self.current.get_mut(&key) {
                if pointer.run_id == self.identity.run_id {
                    *pointer = self.guard.current_execution();
                }
            }
        }

        tracing::debug!(
            run = %self.identity,
            version = self.guard.version(),
            directive = ?directive,
            "Committed execution"
        );
        self.snapshot = None;
        Ok(())
    }

    /// Release the lease, discarding uncommitted changes
    pub fn release(self) {}
}

impl Drop for WorkflowLease {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if *self.guard != snapshot {
                tracing::debug!(run = %self.identity, "Discarding uncommitted changes");
                *self.guard = snapshot;
            }
        }
    }
}

impl std::fmt::Debug for WorkflowLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowLease")
            .field("identity", &self.identity)
            .field("state", &self.guard.state())
            .field("status", &self.guard.status())
            .finish()
    }
}
