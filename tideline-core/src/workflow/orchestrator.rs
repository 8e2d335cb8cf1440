//! Request handling for workflow lifecycle operations

use crate::error::{EngineError, EngineResult};
use crate::models::configuration::EngineConfig;
use crate::models::execution::{
    ExecutionKey, ExecutionStatus, WorkflowIdReusePolicy, WorkflowIdentity,
};
use crate::models::mutable_state::MutableState;
use crate::workflow::action::{ActionDirective, UpdateWorkflowAction};
use crate::workflow::persistence::JsonFilePersistence;
use crate::workflow::resolver::resolve_duplicate_workflow_id;
use crate::workflow::store::{condition_failed, ExecutionStore};
use anyhow::Context;
use std::sync::Arc;

/// Start request as received from the request-handling layer
#[derive(Debug, Clone, PartialEq)]
pub struct StartWorkflowRequest {
    pub namespace: String,
    pub workflow_id: String,
    /// Client-generated ID; repeating it makes the start idempotent
    pub request_id: String,
    pub reuse_policy: WorkflowIdReusePolicy,
    pub input: Option<serde_json::Value>,
}

/// Outcome of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartWorkflowResponse {
    pub run_id: String,
    /// False when an earlier attempt of the same request already created the run
    pub started: bool,
}

/// Applies lifecycle requests against an [`ExecutionStore`]
pub struct WorkflowOrchestrator {
    store: ExecutionStore,
    config: EngineConfig,
}

impl WorkflowOrchestrator {
    /// Create new workflow orchestrator
    pub fn new(store: ExecutionStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Orchestrator over the JSON file store named by `config`
    pub async fn from_config(config: EngineConfig) -> anyhow::Result<Self> {
        let store_path = config.resolved_store_path();
        let persistence = Arc::new(
            JsonFilePersistence::new(&store_path)
                .with_context(|| format!("Failed to open store at {}", store_path.display()))?,
        );
        let store = ExecutionStore::open(persistence, config.lease_timeout()).await?;
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Key in the configured namespace
    pub fn key(&self, workflow_id: &str) -> ExecutionKey {
        ExecutionKey::new(self.config.namespace.clone(), workflow_id)
    }

    /// Start a new run, resolving any collision with the current run.
    ///
    /// Lost races against concurrent updates are re-resolved from a fresh
    /// snapshot, at most `max_conflict_retries` times.
    pub async fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> EngineResult<StartWorkflowResponse> {
        if request.workflow_id.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "workflow id cannot be empty".to_string(),
            ));
        }
        if request.request_id.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "request id cannot be empty".to_string(),
            ));
        }

        let key = ExecutionKey::new(request.namespace.clone(), request.workflow_id.clone());
        let new_identity = WorkflowIdentity::new_run(&key);
        let attempts = self.config.max_conflict_retries.max(1);

        for attempt in 1..=attempts {
            match self.try_start_workflow(&request, &key, &new_identity).await {
                Err(err) if err.is_benign_race() => {
                    tracing::warn!(
                        workflow = %key,
                        attempt,
                        error = %err,
                        "Lost race starting workflow, re-resolving"
                    );
                }
                Err(err) => {
                    tracing::warn!(workflow = %key, error = %err, "Start workflow rejected");
                    return Err(err);
                }
                Ok(response) => return Ok(response),
            }
        }

        tracing::error!(workflow = %key, attempts, "Start workflow retries exhausted");
        Err(EngineError::ConflictRetriesExhausted { attempts })
    }

    async fn try_start_workflow(
        &self,
        request: &StartWorkflowRequest,
        key: &ExecutionKey,
        new_identity: &WorkflowIdentity,
    ) -> EngineResult<StartWorkflowResponse> {
        let previous_run_id = match self.store.current_execution(key) {
            None => None,
            Some(current) => {
                if !self.store.run_exists(key, &current.run_id).await {
                    return Err(self.lost_current(key, &current.run_id));
                }
                if current.is_open() && current.start_request_id == request.request_id {
                    tracing::info!(
                        workflow = %key,
                        run_id = %current.run_id,
                        "Start request already applied"
                    );
                    return Ok(StartWorkflowResponse {
                        run_id: current.run_id,
                        started: false,
                    });
                }

                let action = resolve_duplicate_workflow_id(
                    &key.workflow_id,
                    &new_identity.run_id,
                    &current.run_id,
                    current.state,
                    current.status,
                    &current.start_request_id,
                    request.reuse_policy,
                )?;

                if let Some(action) = action {
                    let mut lease = match self.store.acquire_lease(key, &current.run_id).await {
                        Err(EngineError::NotFound { .. }) => {
                            return Err(self.lost_current(key, &current.run_id))
                        }
                        lease => lease?,
                    };
                    let directive = lease.apply(action)?;
                    lease.commit(directive).await?;
                }
                Some(current.run_id)
            }
        };

        let run = MutableState::new(
            new_identity.clone(),
            request.request_id.clone(),
            request.reuse_policy,
            request.input.clone(),
            previous_run_id.clone(),
        );
        self.store
            .create_run(run, previous_run_id.as_deref())
            .await?;

        tracing::info!(
            run = %new_identity,
            policy = %request.reuse_policy,
            "Started workflow"
        );
        Ok(StartWorkflowResponse {
            run_id: new_identity.run_id.clone(),
            started: true,
        })
    }

    /// The run read from the current pointer was rolled back before it could be used
    fn lost_current(&self, key: &ExecutionKey, run_id: &str) -> EngineError {
        let actual = self.store.current_execution(key).map(|current| current.run_id);
        condition_failed(key, Some(run_id), actual.as_deref())
    }

    /// Lease a run (the current one if `run_id` is `None`), apply `action`, commit
    pub async fn update_workflow(
        &self,
        key: &ExecutionKey,
        run_id: Option<&str>,
        action: UpdateWorkflowAction,
    ) -> EngineResult<ActionDirective> {
        let mut lease = match run_id {
            Some(run_id) => self.store.acquire_lease(key, run_id).await?,
            None => self.store.acquire_current_lease(key).await?,
        };
        let directive = lease.apply(action)?;
        lease.commit(directive).await?;
        Ok(directive)
    }

    /// Operator-initiated termination
    pub async fn terminate_workflow(
        &self,
        key: &ExecutionKey,
        run_id: Option<&str>,
        reason: &str,
        identity: &str,
    ) -> EngineResult<()> {
        self.update_workflow(key, run_id, UpdateWorkflowAction::terminate(reason, identity))
            .await?;
        Ok(())
    }

    /// Close a run with a completion status
    pub async fn complete_workflow(
        &self,
        key: &ExecutionKey,
        run_id: Option<&str>,
        status: ExecutionStatus,
        payload: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        self.update_workflow(key, run_id, UpdateWorkflowAction::complete(status, payload))
            .await?;
        Ok(())
    }

    /// Record that a worker picked up the run's first workflow task
    pub async fn record_workflow_task_started(
        &self,
        key: &ExecutionKey,
        run_id: Option<&str>,
        identity: &str,
    ) -> EngineResult<()> {
        self.update_workflow(key, run_id, UpdateWorkflowAction::start_workflow_task(identity))
            .await?;
        Ok(())
    }

    pub async fn describe_workflow(
        &self,
        key: &ExecutionKey,
        run_id: Option<&str>,
    ) -> EngineResult<MutableState> {
        self.store.describe(key, run_id).await
    }

    pub async fn list_runs(&self, key: &ExecutionKey) -> Vec<MutableState> {
        self.store.list_runs(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::execution::ExecutionState;
    use std::time::Duration;
    use tempfile::tempdir;

    fn orchestrator() -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(
            ExecutionStore::in_memory(Duration::from_secs(1)),
            EngineConfig::default(),
        )
    }

    fn request(request_id: &str, policy: WorkflowIdReusePolicy) -> StartWorkflowRequest {
        StartWorkflowRequest {
            namespace: "default".to_string(),
            workflow_id: "order-42".to_string(),
            request_id: request_id.to_string(),
            reuse_policy: policy,
            input: None,
        }
    }

    #[tokio::test]
    async fn test_start_new_workflow() {
        let orchestrator = orchestrator();
        let response = orchestrator
            .start_workflow(request("req-1", WorkflowIdReusePolicy::AllowDuplicate))
            .await
            .unwrap();
        assert!(response.started);

        let state = orchestrator
            .describe_workflow(&orchestrator.key("order-42"), None)
            .await
            .unwrap();
        assert_eq!(state.run_id(), response.run_id);
        assert_eq!(state.state(), ExecutionState::Created);
    }

    #[tokio::test]
    async fn test_repeated_request_id_is_idempotent() {
        let orchestrator = orchestrator();
        let first = orchestrator
            .start_workflow(request("req-1", WorkflowIdReusePolicy::RejectDuplicate))
            .await
            .unwrap();
        let second = orchestrator
            .start_workflow(request("req-1", WorkflowIdReusePolicy::RejectDuplicate))
            .await
            .unwrap();

        assert_eq!(second.run_id, first.run_id);
        assert!(!second.started);
        assert_eq!(orchestrator.list_runs(&orchestrator.key("order-42")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_request_id_replay_only_applies_to_open_runs() {
        let orchestrator = orchestrator();
        let key = orchestrator.key("order-42");
        let first = orchestrator
            .start_workflow(request("req-1", WorkflowIdReusePolicy::AllowDuplicate))
            .await
            .unwrap();
        orchestrator
            .complete_workflow(&key, None, ExecutionStatus::Succeeded, None)
            .await
            .unwrap();

        let second = orchestrator
            .start_workflow(request("req-1", WorkflowIdReusePolicy::AllowDuplicate))
            .await
            .unwrap();
        assert!(second.started);
        assert_ne!(second.run_id, first.run_id);
    }

    #[tokio::test]
    async fn test_empty_ids_are_rejected() {
        let orchestrator = orchestrator();
        let mut bad = request("", WorkflowIdReusePolicy::AllowDuplicate);
        assert!(matches!(
            orchestrator.start_workflow(bad.clone()).await,
            Err(EngineError::InvalidArgument(_))
        ));
        bad.request_id = "req-1".to_string();
        bad.workflow_id = " ".to_string();
        assert!(matches!(
            orchestrator.start_workflow(bad).await,
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_persists_across_restarts() {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            store_path: Some(dir.path().join("executions.json")),
            ..EngineConfig::default()
        };

        let run_id = {
            let orchestrator = WorkflowOrchestrator::from_config(config.clone()).await.unwrap();
            let response = orchestrator
                .start_workflow(request("req-1", WorkflowIdReusePolicy::AllowDuplicate))
                .await
                .unwrap();
            orchestrator
                .complete_workflow(
                    &orchestrator.key("order-42"),
                    None,
                    ExecutionStatus::Succeeded,
                    None,
                )
                .await
                .unwrap();
            response.run_id
        };

        let reopened = WorkflowOrchestrator::from_config(config).await.unwrap();
        let current = reopened
            .store()
            .current_execution(&reopened.key("order-42"))
            .unwrap();
        assert_eq!(current.run_id, run_id);
        assert_eq!(current.status, ExecutionStatus::Succeeded);

        let err = reopened
            .start_workflow(request("req-2", WorkflowIdReusePolicy::RejectDuplicate))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowExecutionAlreadyStarted { .. }));
    }
}
