//! Test doubles and fixtures shared by the core test modules.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tenantflow_types::config::ControllerConfig;
use tenantflow_types::error::{ControllerError, RepositoryError};
use tenantflow_types::tenant::{OrganizationId, UserId};
use tenantflow_types::workflow::{
    EngineType, NewWorkflow, StatusReport, SubmitWorkflowRequest, Workflow, WorkflowId,
    WorkflowStatus, WorkspaceFile,
};

use crate::engine::{DispatchRequest, EngineDispatcher};
use crate::repository::memory::{InMemoryTenantRepository, InMemoryWorkflowRepository};
use crate::repository::workflow::WorkflowRepository;
use crate::service::lifecycle::LifecycleController;
use crate::storage::WorkspaceAllocator;

pub(crate) const USER: &str = "jane@example.org";

pub(crate) fn sample_workflow(organization_id: OrganizationId, name: &str) -> Workflow {
    let id = WorkflowId::new();
    Workflow::from_new(
        NewWorkflow {
            id,
            name: name.to_string(),
            engine_type: EngineType::new("cwl"),
            parameters: BTreeMap::new(),
            specification: serde_json::json!({"first": "do this"}),
            organization_id,
            user_id: UserId::new(),
            workspace_path: PathBuf::from("/volume/default").join(id.to_string()),
        },
        Utc::now(),
    )
}

fn payload(engine: &str, name: &str) -> SubmitWorkflowRequest {
    SubmitWorkflowRequest {
        name: name.to_string(),
        engine_type: engine.to_string(),
        parameters: BTreeMap::from([
            ("min_year".to_string(), "1991".to_string()),
            ("max_year".to_string(), "2001".to_string()),
        ]),
        specification: serde_json::json!({"first": "do this", "second": "do that"}),
    }
}

pub(crate) fn cwl_payload(name: &str) -> SubmitWorkflowRequest {
    payload("cwl", name)
}

pub(crate) fn yadage_payload(name: &str) -> SubmitWorkflowRequest {
    payload("yadage", name)
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

/// Bookkeeping-only allocator. Failure switches are shared between clones.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeAllocator {
    reserved: Arc<Mutex<HashSet<PathBuf>>>,
    pub fail_reserve: Arc<AtomicBool>,
    pub fail_release: Arc<AtomicBool>,
    /// Pretend every workspace already exists on disk.
    pub collide: Arc<AtomicBool>,
}

impl FakeAllocator {
    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.lock().unwrap().contains(path)
    }

    pub fn reservations(&self) -> usize {
        self.reserved.lock().unwrap().len()
    }
}

fn io_error(kind: std::io::ErrorKind) -> std::io::Error {
    std::io::Error::new(kind, "injected failure")
}

impl WorkspaceAllocator for FakeAllocator {
    fn workspace_path(&self, organization: &str, workflow_id: &WorkflowId) -> PathBuf {
        PathBuf::from("/volume")
            .join(organization)
            .join(workflow_id.to_string())
    }

    async fn reserve(
        &self,
        organization: &str,
        workflow_id: &WorkflowId,
    ) -> Result<PathBuf, ControllerError> {
        let path = self.workspace_path(organization, workflow_id);
        if self.collide.load(Ordering::SeqCst) {
            return Err(ControllerError::WorkspaceExists(path));
        }
        if self.fail_reserve.load(Ordering::SeqCst) {
            return Err(ControllerError::storage_io(
                path,
                io_error(std::io::ErrorKind::PermissionDenied),
            ));
        }
        if !self.reserved.lock().unwrap().insert(path.clone()) {
            return Err(ControllerError::WorkspaceExists(path));
        }
        Ok(path)
    }

    async fn release(
        &self,
        organization: &str,
        workflow_id: &WorkflowId,
    ) -> Result<(), ControllerError> {
        let path = self.workspace_path(organization, workflow_id);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ControllerError::storage_io(
                path,
                io_error(std::io::ErrorKind::ResourceBusy),
            ));
        }
        self.reserved.lock().unwrap().remove(&path);
        Ok(())
    }

    async fn list_files(&self, workspace: &Path) -> Result<Vec<WorkspaceFile>, ControllerError> {
        if self.is_reserved(workspace) {
            Ok(Vec::new())
        } else {
            Err(ControllerError::storage_io(
                workspace,
                io_error(std::io::ErrorKind::NotFound),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow repository
// ---------------------------------------------------------------------------

/// In-memory workflow repository whose `update` can be made to fail.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultyWorkflows {
    inner: InMemoryWorkflowRepository,
    pub fail_update: Arc<AtomicBool>,
}

impl WorkflowRepository for FaultyWorkflows {
    async fn insert(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        self.inner.insert(workflow).await
    }

    async fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        self.inner.get(id).await
    }

    async fn get_by_name(
        &self,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<Option<Workflow>, RepositoryError> {
        self.inner.get_by_name(organization_id, name).await
    }

    async fn list(
        &self,
        organization_id: &OrganizationId,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        self.inner.list(organization_id, status).await
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("injected failure".to_string()));
        }
        self.inner.update(workflow).await
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), RepositoryError> {
        self.inner.delete(id).await
    }

    async fn mark_deleted(&self, id: &WorkflowId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.inner.mark_deleted(id, at).await
    }

    async fn next_name_sequence(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<u64, RepositoryError> {
        self.inner.next_name_sequence(organization_id).await
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum DispatchMode {
    #[default]
    Accept,
    Fail,
    /// Never answer; exercises the timeouts.
    Hang,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingDispatcher {
    mode: Mutex<DispatchMode>,
    dispatched: Mutex<Vec<DispatchRequest>>,
    stopped: Mutex<Vec<WorkflowId>>,
}

impl RecordingDispatcher {
    pub fn set_mode(&self, mode: DispatchMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<WorkflowId> {
        self.stopped.lock().unwrap().clone()
    }

    fn mode(&self) -> DispatchMode {
        *self.mode.lock().unwrap()
    }
}

impl EngineDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), ControllerError> {
        match self.mode() {
            DispatchMode::Accept => {
                self.dispatched.lock().unwrap().push(request);
                Ok(())
            }
            DispatchMode::Fail => Err(ControllerError::Engine("engine unavailable".to_string())),
            DispatchMode::Hang => std::future::pending().await,
        }
    }

    /// Records every stop request, whatever the mode answers.
    async fn stop(&self, workflow_id: &WorkflowId) -> Result<(), ControllerError> {
        self.stopped.lock().unwrap().push(*workflow_id);
        match self.mode() {
            DispatchMode::Accept => Ok(()),
            DispatchMode::Fail => Err(ControllerError::Engine("engine unavailable".to_string())),
            DispatchMode::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller harness
// ---------------------------------------------------------------------------

pub(crate) type TestController = LifecycleController<
    InMemoryTenantRepository,
    FaultyWorkflows,
    FakeAllocator,
    RecordingDispatcher,
>;

/// A controller with organizations `default` and `other`, both linked to `USER`.
pub(crate) struct Harness {
    pub controller: TestController,
    pub allocator: FakeAllocator,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub workflows: FaultyWorkflows,
}

pub(crate) async fn harness() -> Harness {
    harness_with(ControllerConfig::default()).await
}

pub(crate) async fn harness_with(config: ControllerConfig) -> Harness {
    let allocator = FakeAllocator::default();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let workflows = FaultyWorkflows::default();
    let controller = LifecycleController::new(
        InMemoryTenantRepository::new(),
        workflows.clone(),
        allocator.clone(),
        Arc::clone(&dispatcher),
        &config,
    );
    for organization in ["default", "other"] {
        controller.provision_organization(organization).await.unwrap();
        controller.link_user(organization, USER).await.unwrap();
    }
    Harness {
        controller,
        allocator,
        dispatcher,
        workflows,
    }
}

impl Harness {
    pub async fn submit(
        &self,
        organization: &str,
        payload: SubmitWorkflowRequest,
    ) -> Result<Workflow, ControllerError> {
        self.controller.submit(organization, USER, payload).await
    }

    pub async fn list(&self, organization: &str) -> Vec<Workflow> {
        self.controller.list(organization, None).await.unwrap()
    }

    /// Submit a generated-name cwl workflow and report it through to `finished`.
    pub async fn finished_workflow(&self, organization: &str) -> Workflow {
        let wf = self.submit(organization, cwl_payload("")).await.unwrap();
        for status in [WorkflowStatus::Running, WorkflowStatus::Finished] {
            self.controller
                .report_status(StatusReport::status(wf.id, status))
                .await
                .unwrap();
        }
        self.controller.get(&wf.id).await.unwrap()
    }
}
