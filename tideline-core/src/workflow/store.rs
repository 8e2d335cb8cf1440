//! Execution store: current-run pointers, run registry and lease provider

use crate::error::{EngineError, EngineResult};
use crate::models::execution::{CurrentExecution, ExecutionKey, WorkflowIdentity};
use crate::models::mutable_state::MutableState;
use crate::workflow::lease::WorkflowLease;
use crate::workflow::persistence::{ExecutionPersistence, InMemoryPersistence};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type RunHandle = Arc<Mutex<MutableState>>;

/// Registry of runs and the current run of every workflow ID.
///
/// Cloning is cheap; clones share the same underlying maps.
#[derive(Clone)]
pub struct ExecutionStore {
    runs: Arc<DashMap<WorkflowIdentity, RunHandle>>,
    current: Arc<DashMap<ExecutionKey, CurrentExecution>>,
    persistence: Arc<dyn ExecutionPersistence>,
    lease_timeout: Duration,
}

impl ExecutionStore {
    /// Create an empty store committing through `persistence`
    pub fn new(persistence: Arc<dyn ExecutionPersistence>, lease_timeout: Duration) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            current: Arc::new(DashMap::new()),
            persistence,
            lease_timeout,
        }
    }

    /// Store without durable persistence
    pub fn in_memory(lease_timeout: Duration) -> Self {
        Self::new(Arc::new(InMemoryPersistence::new()), lease_timeout)
    }

    /// Create a store pre-populated with everything `persistence` holds
    pub async fn open(
        persistence: Arc<dyn ExecutionPersistence>,
        lease_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let loaded = persistence.load_all().await?;
        let store = Self::new(persistence, lease_timeout);

        for run in loaded.runs {
            store
                .runs
                .insert(run.identity().clone(), Arc::new(Mutex::new(run)));
        }
        for record in loaded.current {
            store.current.insert(record.key, record.current);
        }

        tracing::info!(
            runs = store.runs.len(),
            workflows = store.current.len(),
            "Loaded execution store"
        );
        Ok(store)
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Snapshot of the current run for a workflow ID, if any
    pub fn current_execution(&self, key: &ExecutionKey) -> Option<CurrentExecution> {
        self.current.get(key).map(|entry| entry.clone())
    }

    /// Register a new run and make it the current run of its workflow ID.
    ///
    /// Succeeds only if the current pointer still names `expected_prev` and
    /// that run is closed, or if no run exists and none was expected.
    ///
    /// The run is published locked and stays locked until storage accepted
    /// it: leases and reads that find it through the new pointer wait for the
    /// write, and see it as missing if the write failed and was rolled back.
    pub async fn create_run(
        &self,
        run: MutableState,
        expected_prev: Option<&str>,
    ) -> EngineResult<()> {
        let identity = run.identity().clone();
        let key = identity.key();
        let pointer = run.current_execution();
        let handle: RunHandle = Arc::new(Mutex::new(run));
        let guard = handle.clone().lock_owned().await;

        self.runs.insert(identity.clone(), handle);
        let previous = match self.current.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if expected_prev != Some(current.run_id.as_str()) || current.is_open() {
                    let err = condition_failed(&key, expected_prev, Some(&current.run_id));
                    drop(entry);
                    self.runs.remove(&identity);
                    return Err(err);
                }
                Some(entry.insert(pointer))
            }
            Entry::Vacant(entry) => {
                if expected_prev.is_some() {
                    drop(entry);
                    self.runs.remove(&identity);
                    return Err(condition_failed(&key, expected_prev, None));
                }
                entry.insert(pointer);
                None
            }
        };

        if let Err(err) = self.persistence.save(&guard, true).await {
            tracing::error!(run = %identity, error = %err, "Failed to persist new run");
            self.restore_pointer(&key, &identity.run_id, previous);
            self.runs.remove(&identity);
            return Err(err.into());
        }

        drop(guard);
        tracing::info!(run = %identity, previous_run_id = ?expected_prev, "Created workflow run");
        Ok(())
    }

    /// Whether `run_id` exists, once any creation of it still being persisted settles
    pub async fn run_exists(&self, key: &ExecutionKey, run_id: &str) -> bool {
        let identity = key.with_run(run_id);
        let Ok(handle) = self.run_handle(&identity) else {
            return false;
        };
        let _state = handle.lock().await;
        self.is_registered(&identity, &handle)
    }

    /// Wait up to the lease timeout for exclusive access to a run
    pub async fn acquire_lease(
        &self,
        key: &ExecutionKey,
        run_id: &str,
    ) -> EngineResult<WorkflowLease> {
        let identity = key.with_run(run_id);
        let handle = self.run_handle(&identity)?;

        match tokio::time::timeout(self.lease_timeout, handle.clone().lock_owned()).await {
            Ok(_) if !self.is_registered(&identity, &handle) => {
                Err(not_found(key, Some(run_id)))
            }
            Ok(guard) => Ok(WorkflowLease::new(
                guard,
                self.current.clone(),
                self.persistence.clone(),
            )),
            Err(_) => {
                tracing::warn!(run = %identity, "Timed out waiting for lease");
                Err(EngineError::LeaseTimeout {
                    namespace: identity.namespace,
                    workflow_id: identity.workflow_id,
                    run_id: identity.run_id,
                    timeout_ms: self.lease_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Acquire a lease only if nobody holds one right now
    pub fn try_acquire_lease(
        &self,
        key: &ExecutionKey,
        run_id: &str,
    ) -> EngineResult<WorkflowLease> {
        let identity = key.with_run(run_id);
        let handle = self.run_handle(&identity)?;

        match handle.clone().try_lock_owned() {
            Ok(_) if !self.is_registered(&identity, &handle) => {
                Err(not_found(key, Some(run_id)))
            }
            Ok(guard) => Ok(WorkflowLease::new(
                guard,
                self.current.clone(),
                self.persistence.clone(),
            )),
            Err(_) => Err(EngineError::AlreadyLeased {
                namespace: identity.namespace,
                workflow_id: identity.workflow_id,
                run_id: identity.run_id,
            }),
        }
    }

    /// Lease whichever run is current for the workflow ID
    pub async fn acquire_current_lease(
        &self,
        key: &ExecutionKey,
    ) -> EngineResult<WorkflowLease> {
        let run_id = self
            .current_execution(key)
            .map(|current| current.run_id)
            .ok_or_else(|| not_found(key, None))?;
        self.acquire_lease(key, &run_id).await
    }

    /// Copy of a run's state; the current run when `run_id` is `None`
    pub async fn describe(
        &self,
        key: &ExecutionKey,
        run_id: Option<&str>,
    ) -> EngineResult<MutableState> {
        let run_id = match run_id {
            Some(run_id) => run_id.to_string(),
            None => self
                .current_execution(key)
                .map(|current| current.run_id)
                .ok_or_else(|| not_found(key, None))?,
        };
        let identity = key.with_run(run_id);
        let handle = self.run_handle(&identity)?;
        let state = handle.lock().await;
        if !self.is_registered(&identity, &handle) {
            return Err(not_found(key, Some(&identity.run_id)));
        }
        Ok(state.clone())
    }

    /// All runs of a workflow ID, oldest first
    pub async fn list_runs(&self, key: &ExecutionKey) -> Vec<MutableState> {
        let handles: Vec<(WorkflowIdentity, RunHandle)> = self
            .runs
            .iter()
            .filter(|entry| {
                entry.key().namespace == key.namespace && entry.key().workflow_id == key.workflow_id
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut runs = Vec::with_capacity(handles.len());
        for (identity, handle) in handles {
            let state = handle.lock().await;
            if self.is_registered(&identity, &handle) {
                runs.push(state.clone());
            }
        }
        runs.sort_by_key(|run| run.started_at());
        runs
    }

    fn run_handle(&self, identity: &WorkflowIdentity) -> EngineResult<RunHandle> {
        self.runs
            .get(identity)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(&identity.key(), Some(&identity.run_id)))
    }

    /// False once a failed creation unregistered the run behind `handle`
    fn is_registered(&self, identity: &WorkflowIdentity, handle: &RunHandle) -> bool {
        self.runs
            .get(identity)
            .map(|entry| Arc::ptr_eq(entry.value(), handle))
            .unwrap_or(false)
    }

    fn restore_pointer(
        &self,
        key: &ExecutionKey,
        run_id: &str,
        previous: Option<CurrentExecution>,
    ) {
        if let Entry::Occupied(mut entry) = self.current.entry(key.clone()) {
            if entry.get().run_id != run_id {
                return;
            }
            match previous {
                Some(previous) => {
                    entry.insert(previous);
                }
                None => {
                    entry.remove();
                }
            }
        }
    }
}

pub(crate) fn condition_failed(
    key: &ExecutionKey,
    expected: Option<&str>,
    actual: Option<&str>,
) -> EngineError {
    EngineError::CurrentWorkflowConditionFailed {
        namespace: key.namespace.clone(),
        workflow_id: key.workflow_id.clone(),
        expected: expected.map(str::to_string),
        actual: actual.map(str::to_string),
    }
}

fn not_found(key: &ExecutionKey, run_id: Option<&str>) -> EngineError {
    EngineError::NotFound {
        namespace: key.namespace.clone(),
        workflow_id: key.workflow_id.clone(),
        run_id: run_id.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::execution::{ExecutionState, ExecutionStatus, WorkflowIdReusePolicy};
    use crate::workflow::action::{ActionDirective, UpdateWorkflowAction};

    fn key() -> ExecutionKey {
        ExecutionKey::new("default", "order-42")
    }

    fn new_run(run_id: &str, prev: Option<&str>) -> MutableState {
        MutableState::new(
            key().with_run(run_id),
            format!("req-{}", run_id),
            WorkflowIdReusePolicy::AllowDuplicate,
            None,
            prev.map(str::to_string),
        )
    }

    fn store() -> ExecutionStore {
        ExecutionStore::in_memory(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_create_run_sets_current_pointer() {
        let store = store();
        store.create_run(new_run("run-1", None), None).await.unwrap();

        let current = store.current_execution(&key()).unwrap();
        assert_eq!(current.run_id, "run-1");
        assert_eq!(current.state, ExecutionState::Created);
        assert_eq!(current.start_request_id, "req-run-1");
    }

    #[tokio::test]
    async fn test_create_run_rejects_when_previous_is_open() {
        let store = store();
        store.create_run(new_run("run-1", None), None).await.unwrap();

        let err = store
            .create_run(new_run("run-2", Some("run-1")), Some("run-1"))
            .await
            .unwrap_err();
        assert!(err.is_benign_race());

        let err = store.create_run(new_run("run-3", None), None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::CurrentWorkflowConditionFailed { actual: Some(ref run), .. } if run == "run-1"
        ));
    }

    #[tokio::test]
    async fn test_lease_commit_refreshes_pointer() {
        let store = store();
        store.create_run(new_run("run-1", None), None).await.unwrap();

        let mut lease = store.acquire_lease(&key(), "run-1").await.unwrap();
        let directive = lease
            .apply(UpdateWorkflowAction::complete(ExecutionStatus::Succeeded, None))
            .unwrap();
        lease.commit(directive).await.unwrap();

        let current = store.current_execution(&key()).unwrap();
        assert_eq!(current.state, ExecutionState::Completed);
        assert_eq!(current.status, ExecutionStatus::Succeeded);

        store
            .create_run(new_run("run-2", Some("run-1")), Some("run-1"))
            .await
            .unwrap();
        assert_eq!(store.list_runs(&key()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let store = store();
        store.create_run(new_run("run-1", None), None).await.unwrap();

        {
            let mut lease = store.acquire_lease(&key(), "run-1").await.unwrap();
            lease
                .apply(UpdateWorkflowAction::terminate("oops", "test"))
                .unwrap();
            lease.release();
        }

        let state = store.describe(&key(), Some("run-1")).await.unwrap();
        assert!(state.is_workflow_execution_running());
        assert!(store.current_execution(&key()).unwrap().is_open());
    }

    #[tokio::test]
    async fn test_noop_commit_discards_direct_edits() {
        let store = store();
        store.create_run(new_run("run-1", None), None).await.unwrap();

        let mut lease = store.acquire_lease(&key(), "run-1").await.unwrap();
        lease
            .mutable_state_mut()
            .complete(ExecutionStatus::Succeeded, None)
            .unwrap();
        lease.commit(ActionDirective::Noop).await.unwrap();

        let state = store.describe(&key(), Some("run-1")).await.unwrap();
        assert!(state.is_workflow_execution_running());
        assert_eq!(state.version(), 0);
        assert!(store.current_execution(&key()).unwrap().is_open());
    }

    #[tokio::test]
    async fn test_try_acquire_fails_while_leased() {
        let store = store();
        store.create_run(new_run("run-1", None), None).await.unwrap();

        let lease = store.try_acquire_lease(&key(), "run-1").unwrap();
        let err = store.try_acquire_lease(&key(), "run-1").unwrap_err();
        assert!(matches!(err, EngineError::AlreadyLeased { .. }));

        let err = store.acquire_lease(&key(), "run-1").await.unwrap_err();
        assert!(matches!(err, EngineError::LeaseTimeout { timeout_ms: 200, .. }));

        drop(lease);
        assert!(store.try_acquire_lease(&key(), "run-1").is_ok());
    }

    #[tokio::test]
    async fn test_new_workflow_task_directive_schedules_task() {
        let store = store();
        store.create_run(new_run("run-1", None), None).await.unwrap();

        let mut lease = store.acquire_current_lease(&key()).await.unwrap();
        lease
            .apply(UpdateWorkflowAction::start_workflow_task("worker"))
            .unwrap();
        assert!(!lease.mutable_state().has_pending_workflow_task());
        lease
            .commit(ActionDirective::UpdateWithNewWorkflowTask)
            .await
            .unwrap();

        let state = store.describe(&key(), None).await.unwrap();
        assert!(state.has_pending_workflow_task());
        assert_eq!(state.version(), 1);
        assert_eq!(state.state(), ExecutionState::Running);
    }

    #[tokio::test]
    async fn test_missing_run_is_not_found() {
        let store = store();
        let err = store.acquire_lease(&key(), "nope").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert!(store.acquire_current_lease(&key()).await.is_err());
        assert!(store.describe(&key(), None).await.is_err());
    }
}
