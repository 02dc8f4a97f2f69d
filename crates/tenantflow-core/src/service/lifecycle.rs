//! Workflow lifecycle controller.
//!
//! Drives a workflow from submission to deletion:
//!
//! 1. resolve and authorize the owner
//! 2. validate engine type and specification
//! 3. assign a name
//! 4. create the record in `created`
//! 5. reserve the workspace (record is discarded on failure)
//! 6. move to `pending` (workspace released and record discarded on failure)
//! 7. hand the workflow to its engine in a background task
//!
//! `submit` returns once the workflow is `pending`. Engines report progress
//! through `report_status`; a failed or timed-out dispatch moves the workflow
//! to `failed` with the error appended to its logs. A timed-out dispatch is
//! also stopped at the engine, which may have accepted it late.
//!
//! `stop` never overtakes a dispatch: it aborts the in-flight dispatch and
//! waits for it to settle before asking the engine to stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tenantflow_types::config::ControllerConfig;
use tenantflow_types::error::ControllerError;
use tenantflow_types::tenant::{Organization, User};
use tenantflow_types::workflow::{
    DeletionReport, EngineType, NewWorkflow, StatusReport, SubmitWorkflowRequest, Workflow,
    WorkflowId, WorkflowLogs, WorkflowStatus, WorkspaceFile,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::engine::{DispatchRequest, EngineDispatcher, StatusSink};
use crate::repository::tenant::TenantRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::service::naming::{MAX_GENERATION_ATTEMPTS, NameResolver};
use crate::service::registry::TenantRegistry;
use crate::service::store::WorkflowStore;
use crate::storage::WorkspaceAllocator;

/// A dispatch task that has not finished yet.
#[derive(Debug, Clone, Default)]
struct InflightDispatch {
    /// Cancelled by `stop` to abandon the dispatch.
    abort: CancellationToken,
    /// Cancelled when the dispatch task is done, on every path.
    settled: CancellationToken,
}

pub struct LifecycleController<T, W, A, E>
where
    T: TenantRepository,
    W: WorkflowRepository,
    A: WorkspaceAllocator,
    E: EngineDispatcher,
{
    registry: TenantRegistry<T>,
    naming: NameResolver<W>,
    store: Arc<WorkflowStore<W, T>>,
    allocator: A,
    dispatcher: Arc<E>,
    queues: HashMap<EngineType, String>,
    dispatch_timeout: Duration,
    stop_timeout: Duration,
    dispatches: TaskTracker,
    inflight: Arc<DashMap<WorkflowId, InflightDispatch>>,
}

impl<T, W, A, E> LifecycleController<T, W, A, E>
where
    T: TenantRepository + Clone + 'static,
    W: WorkflowRepository + Clone + 'static,
    A: WorkspaceAllocator,
    E: EngineDispatcher + 'static,
{
    pub fn new(
        tenants: T,
        workflows: W,
        allocator: A,
        dispatcher: Arc<E>,
        config: &ControllerConfig,
    ) -> Self {
        let queues = config
            .engines
            .iter()
            .map(|e| (EngineType::new(&e.name), e.queue.clone()))
            .collect();
        let store = WorkflowStore::new(
            workflows.clone(),
            tenants.clone(),
            config.engine_types(),
            config.deletion_policy,
        );
        Self {
            registry: TenantRegistry::new(tenants),
            naming: NameResolver::new(workflows),
            store: Arc::new(store),
            allocator,
            dispatcher,
            queues,
            dispatch_timeout: config.dispatch_timeout(),
            stop_timeout: config.stop_timeout(),
            dispatches: TaskTracker::new(),
            inflight: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &TenantRegistry<T> {
        &self.registry
    }

    pub async fn provision_organization(&self, name: &str) -> Result<Organization, ControllerError> {
        self.registry.provision_organization(name).await
    }

    pub async fn link_user(&self, organization: &str, email: &str) -> Result<User, ControllerError> {
        self.registry.link_user(organization, email).await
    }

    /// Admit a workflow and queue it for execution.
    #[tracing::instrument(skip(self, request), fields(engine = %request.engine_type))]
    pub async fn submit(
        &self,
        organization: &str,
        user_email: &str,
        request: SubmitWorkflowRequest,
    ) -> Result<Workflow, ControllerError> {
        let owner = self.registry.resolve_owner(organization, user_email).await?;
        let engine = self.store.validate_engine(&request.engine_type)?;
        self.store.validate_specification(&request.specification)?;
        let queue = self
            .queues
            .get(&engine)
            .cloned()
            .unwrap_or_else(|| format!("{engine}-default-queue"));

        let generated = request.name.trim().is_empty();
        let mut attempts = 0;
        let workflow = loop {
            let name = self
                .naming
                .assign_name(&owner.organization, &engine, &request.name)
                .await?;
            let id = WorkflowId::new();
            let new = NewWorkflow {
                id,
                name,
                engine_type: engine.clone(),
                parameters: request.parameters.clone(),
                specification: request.specification.clone(),
                organization_id: owner.organization.id,
                user_id: owner.user.id,
                workspace_path: self.allocator.workspace_path(&owner.organization.name, &id),
            };
            match self.store.create(new).await {
                Ok(workflow) => break workflow,
                // Another submission took the generated name between check and insert.
                Err(ControllerError::NameConflict { name, .. })
                    if generated && attempts < MAX_GENERATION_ATTEMPTS =>
                {
                    attempts += 1;
                    debug!(%name, "generated name raced, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        if let Err(e) = self
            .allocator
            .reserve(&owner.organization.name, &workflow.id)
            .await
        {
            warn!(workflow_id = %workflow.id, error = %e, "workspace reservation failed, rolling back");
            self.rollback_record(&workflow.id).await;
            return Err(e);
        }

        let workflow = match self
            .store
            .update_status(&workflow.id, WorkflowStatus::Pending, None)
            .await
        {
            Ok(workflow) => workflow,
            Err(e) => {
                warn!(workflow_id = %workflow.id, error = %e, "queueing failed, rolling back");
                if let Err(release) = self
                    .allocator
                    .release(&owner.organization.name, &workflow.id)
                    .await
                {
                    warn!(workflow_id = %workflow.id, error = %release, "workspace release failed during rollback");
                }
                self.rollback_record(&workflow.id).await;
                return Err(e);
            }
        };

        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            organization = %owner.organization.name,
            user = %owner.user.email,
            "workflow submitted"
        );
        self.spawn_dispatch(DispatchRequest::for_workflow(
            &workflow,
            &owner.organization.name,
            &queue,
        ));
        Ok(workflow)
    }

    async fn rollback_record(&self, id: &WorkflowId) {
        if let Err(e) = self.store.discard(id).await {
            warn!(workflow_id = %id, error = %e, "failed to discard record during rollback");
        }
    }

    fn spawn_dispatch(&self, request: DispatchRequest) {
        let id = request.workflow_id;
        let inflight = InflightDispatch::default();
        // Registered before the task runs so a `stop` right after `submit` sees it.
        self.inflight.insert(id, inflight.clone());

        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let in_flight = Arc::clone(&self.inflight);
        let timeout = self.dispatch_timeout;
        let stop_timeout = self.stop_timeout;

        self.dispatches.spawn(async move {
            let _settled = inflight.settled.drop_guard();
            let outcome = tokio::select! {
                biased;
                _ = inflight.abort.cancelled() => None,
                result = tokio::time::timeout(timeout, dispatcher.dispatch(request)) => Some(result),
            };

            let reason = match outcome {
                None => {
                    debug!(workflow_id = %id, "dispatch abandoned, workflow is being stopped");
                    None
                }
                Some(Ok(Ok(()))) => {
                    debug!(workflow_id = %id, "workflow dispatched");
                    None
                }
                Some(Ok(Err(e))) => Some(e.to_string()),
                Some(Err(_)) => {
                    // The engine may still have taken the workflow.
                    match tokio::time::timeout(stop_timeout, dispatcher.stop(&id)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(workflow_id = %id, error = %e, "engine failed to stop timed-out dispatch")
                        }
                        Err(_) => {
                            warn!(workflow_id = %id, "engine stop timed out after dispatch timeout")
                        }
                    }
                    Some(format!("engine did not accept the workflow within {timeout:?}"))
                }
            };

            if let Some(reason) = reason {
                warn!(workflow_id = %id, %reason, "dispatch failed");
                let logs = format!("dispatch failed: {reason}");
                if let Err(e) = store
                    .update_status(&id, WorkflowStatus::Failed, Some(&logs))
                    .await
                {
                    // Already terminal (e.g. stopped meanwhile) or deleted.
                    debug!(workflow_id = %id, error = %e, "could not mark workflow failed");
                }
            }
            in_flight.remove(&id);
        });
    }

    /// Abandon an in-flight dispatch and wait until its task is done.
    async fn settle_dispatch(&self, id: &WorkflowId) {
        let Some(inflight) = self.inflight.get(id).map(|entry| entry.value().clone()) else {
            return;
        };
        inflight.abort.cancel();
        if tokio::time::timeout(self.stop_timeout, inflight.settled.cancelled())
            .await
            .is_err()
        {
            warn!(workflow_id = %id, "dispatch did not settle before stop");
        }
    }

    /// Wait until every in-flight dispatch task has finished.
    pub async fn wait_for_dispatches(&self) {
        self.dispatches.close();
        self.dispatches.wait().await;
        self.dispatches.reopen();
    }

    pub async fn get(&self, id: &WorkflowId) -> Result<Workflow, ControllerError> {
        self.store.get(id).await
    }

    pub async fn find(&self, organization: &str, id_or_name: &str) -> Result<Workflow, ControllerError> {
        let organization = self.registry.organization_by_name(organization).await?;
        self.store.find(&organization.id, id_or_name).await
    }

    pub async fn list(
        &self,
        organization: &str,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, ControllerError> {
        let organization = self.registry.organization_by_name(organization).await?;
        self.store.list_by_organization(&organization.id, status).await
    }

    pub async fn logs(&self, organization: &str, id_or_name: &str) -> Result<WorkflowLogs, ControllerError> {
        let workflow = self.find(organization, id_or_name).await?;
        Ok(WorkflowLogs {
            workflow_id: workflow.id,
            workflow_name: workflow.name,
            status: workflow.status,
            logs: workflow.logs,
        })
    }

    pub async fn workspace_files(
        &self,
        organization: &str,
        id_or_name: &str,
    ) -> Result<Vec<WorkspaceFile>, ControllerError> {
        let workflow = self.find(organization, id_or_name).await?;
        self.allocator.list_files(&workflow.workspace_path).await
    }

    /// Apply an engine status report.
    ///
    /// Job progress is merged first. A report without status only appends
    /// logs; a report with neither status nor logs returns the record as is.
    pub async fn report_status(&self, report: StatusReport) -> Result<Workflow, ControllerError> {
        let id = report.workflow_id;
        let progressed = match &report.progress {
            Some(progress) => Some(self.store.update_progress(&id, progress).await?),
            None => None,
        };
        match (report.status, report.logs) {
            (Some(status), logs) => self.store.update_status(&id, status, logs.as_deref()).await,
            (None, Some(logs)) => self.store.append_logs(&id, &logs).await,
            (None, None) => match progressed {
                Some(workflow) => Ok(workflow),
                None => self.store.get(&id).await,
            },
        }
    }

    /// Cancel an active workflow.
    ///
    /// A dispatch still in flight is abandoned first. The engine is then
    /// notified best-effort within the stop timeout; the workflow ends up
    /// `stopped` whatever the engine answers.
    pub async fn stop(&self, id: &WorkflowId) -> Result<Workflow, ControllerError> {
        let workflow = self.store.get(id).await?;
        if !workflow.status.is_active() {
            return Err(ControllerError::IllegalTransition {
                from: workflow.status,
                to: WorkflowStatus::Stopped,
            });
        }
        self.settle_dispatch(id).await;

        let note = match tokio::time::timeout(self.stop_timeout, self.dispatcher.stop(id)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!(workflow_id = %id, error = %e, "engine failed to stop workflow");
                Some(format!("engine stop failed: {e}"))
            }
            Err(_) => {
                warn!(workflow_id = %id, timeout = ?self.stop_timeout, "engine stop timed out");
                Some(format!(
                    "engine did not acknowledge stop within {:?}",
                    self.stop_timeout
                ))
            }
        };

        self.store
            .update_status(id, WorkflowStatus::Stopped, note.as_deref())
            .await
    }

    /// Delete a terminal workflow and release its workspace.
    ///
    /// The record is gone even if the workspace cannot be removed; the report
    /// then carries the cleanup error and `purge_workspace` can retry.
    pub async fn delete(&self, id: &WorkflowId) -> Result<DeletionReport, ControllerError> {
        let current = self.store.get(id).await?;
        let organization = self.registry.organization(&current.organization_id).await?;
        let workflow = self.store.delete(id).await?;

        let cleanup_error = match self.allocator.release(&organization.name, id).await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    workflow_id = %id,
                    path = %workflow.workspace_path.display(),
                    error = %e,
                    "workspace cleanup failed"
                );
                Some(e.to_string())
            }
        };

        Ok(DeletionReport {
            workflow_id: workflow.id,
            workflow_name: workflow.name,
            workspace_path: workflow.workspace_path,
            workspace_released: cleanup_error.is_none(),
            cleanup_error,
        })
    }

    /// Retry the workspace cleanup of an already deleted workflow.
    pub async fn purge_workspace(&self, organization: &str, id: &WorkflowId) -> Result<(), ControllerError> {
        let organization = self.registry.organization_by_name(organization).await?;
        if let Ok(workflow) = self.store.get(id).await {
            return Err(ControllerError::Validation(format!(
                "workflow {} ({}) still exists; delete it instead",
                workflow.id, workflow.status
            )));
        }
        self.allocator.release(&organization.name, id).await?;
        info!(workflow_id = %id, organization = %organization.name, "workspace purged");
        Ok(())
    }
}

impl<T, W, A, E> StatusSink for LifecycleController<T, W, A, E>
where
    T: TenantRepository + Clone + 'static,
    W: WorkflowRepository + Clone + 'static,
    A: WorkspaceAllocator,
    E: EngineDispatcher + 'static,
{
    async fn apply_report(&self, report: StatusReport) -> Result<Workflow, ControllerError> {
        self.report_status(report).await
    }
}
