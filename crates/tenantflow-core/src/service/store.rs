//! Workflow store.
//!
//! The only path through which workflow records are created, transitioned
//! and deleted. Wraps a `WorkflowRepository` and enforces at the boundary:
//!
//! - the engine type is supported and the specification is a JSON object
//! - the owning organization and user exist and are linked
//! - status transitions follow the lifecycle state machine
//! - only terminal workflows are deleted
//!
//! Mutations of one workflow are serialized by a per-record async lock.
//! Different workflows never share a lock.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tenantflow_types::config::DeletionPolicy;
use tenantflow_types::error::{ControllerError, RepositoryError};
use tenantflow_types::tenant::OrganizationId;
use tenantflow_types::workflow::{
    EngineType, NewWorkflow, ProgressUpdate, Workflow, WorkflowId, WorkflowStatus,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::repository::tenant::TenantRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::service::naming::validate_name;

/// Lazily created per-workflow mutexes.
///
/// The map guard is dropped before awaiting the mutex, so no `DashMap` shard
/// lock is ever held across `.await`. Entries are pruned when their last
/// holder releases them.
#[derive(Debug, Default)]
struct RecordLocks {
    inner: DashMap<WorkflowId, Arc<Mutex<()>>>,
}

impl RecordLocks {
    async fn acquire(&self, id: &WorkflowId) -> RecordGuard<'_> {
        let lock = self.inner.entry(*id).or_default().clone();
        RecordGuard {
            guard: Some(lock.lock_owned().await),
            locks: self,
            id: *id,
        }
    }

    /// Drop the entry if nobody else holds or waits on it.
    fn forget(&self, id: &WorkflowId) {
        self.inner.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Holds a record lock; releasing it prunes the entry when uncontended.
struct RecordGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a RecordLocks,
    id: WorkflowId,
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so our own clone of the mutex no longer counts.
        self.guard.take();
        self.locks.forget(&self.id);
    }
}

pub struct WorkflowStore<W: WorkflowRepository, T: TenantRepository> {
    repo: W,
    tenants: T,
    engines: HashSet<EngineType>,
    deletion_policy: DeletionPolicy,
    locks: RecordLocks,
}

impl<W: WorkflowRepository, T: TenantRepository> WorkflowStore<W, T> {
    pub fn new(
        repo: W,
        tenants: T,
        engines: impl IntoIterator<Item = EngineType>,
        deletion_policy: DeletionPolicy,
    ) -> Self {
        Self {
            repo,
            tenants,
            engines: engines.into_iter().collect(),
            deletion_policy,
            locks: RecordLocks::default(),
        }
    }

    /// Normalize an engine type and check that it is supported.
    pub fn validate_engine(&self, engine_type: &str) -> Result<EngineType, ControllerError> {
        let engine = EngineType::new(engine_type);
        if self.engines.contains(&engine) {
            return Ok(engine);
        }
        let mut supported: Vec<&str> = self.engines.iter().map(EngineType::as_str).collect();
        supported.sort_unstable();
        Err(ControllerError::Validation(format!(
            "engine type '{engine_type}' is not supported (expected one of: {})",
            supported.join(", ")
        )))
    }

    pub fn validate_specification(
        &self,
        specification: &serde_json::Value,
    ) -> Result<(), ControllerError> {
        if specification.is_object() {
            Ok(())
        } else {
            Err(ControllerError::Validation(
                "workflow specification must be a JSON object".to_string(),
            ))
        }
    }

    /// Create a record in `created` state.
    pub async fn create(&self, new: NewWorkflow) -> Result<Workflow, ControllerError> {
        if !self.engines.contains(&new.engine_type) {
            return Err(ControllerError::Validation(format!(
                "engine type '{}' is not supported",
                new.engine_type
            )));
        }
        self.validate_specification(&new.specification)?;
        if new.name.trim().is_empty() {
            return Err(ControllerError::Validation(
                "workflow name cannot be empty".to_string(),
            ));
        }
        validate_name(&new.name)?;

        let organization = self
            .tenants
            .get_organization(&new.organization_id)
            .await?
            .ok_or_else(|| ControllerError::UnknownOrganization(new.organization_id.to_string()))?;
        let unauthorized = || ControllerError::UnauthorizedUser {
            user: new.user_id.to_string(),
            organization: organization.name.clone(),
        };
        if self.tenants.get_user(&new.user_id).await?.is_none()
            || !self
                .tenants
                .is_member(&new.organization_id, &new.user_id)
                .await?
        {
            return Err(unauthorized());
        }

        let workflow = Workflow::from_new(new, Utc::now());
        self.repo.insert(&workflow).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => ControllerError::NameConflict {
                organization: organization.name.clone(),
                name: workflow.name.clone(),
            },
            other => other.into(),
        })?;

        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            organization = %organization.name,
            engine = %workflow.engine_type,
            "workflow created"
        );
        Ok(workflow)
    }

    pub async fn get(&self, id: &WorkflowId) -> Result<Workflow, ControllerError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    pub async fn get_by_name(
        &self,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<Workflow, ControllerError> {
        self.repo
            .get_by_name(organization_id, name)
            .await?
            .ok_or_else(|| ControllerError::NotFound(name.to_string()))
    }

    /// Look up a workflow of an organization by id or by name.
    ///
    /// A workflow that exists but belongs to another organization is `NotFound`.
    pub async fn find(
        &self,
        organization_id: &OrganizationId,
        id_or_name: &str,
    ) -> Result<Workflow, ControllerError> {
        let id_or_name = id_or_name.trim();
        debug!(organization_id = %organization_id, id_or_name, "workflow lookup");
        match id_or_name.parse::<WorkflowId>() {
            Ok(id) => match self.repo.get(&id).await? {
                Some(wf) if wf.organization_id == *organization_id => Ok(wf),
                _ => Err(ControllerError::NotFound(id_or_name.to_string())),
            },
            Err(_) => self.get_by_name(organization_id, id_or_name).await,
        }
    }

    pub async fn list_by_organization(
        &self,
        organization_id: &OrganizationId,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, ControllerError> {
        Ok(self.repo.list(organization_id, status).await?)
    }

    /// Transition a workflow, optionally appending engine output.
    ///
    /// Reporting the current status again is a no-op apart from the logs.
    /// An illegal transition leaves the stored record untouched.
    pub async fn update_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        logs: Option<&str>,
    ) -> Result<Workflow, ControllerError> {
        let _guard = self.locks.acquire(id).await;
        let mut workflow = self.get(id).await?;
        let from = workflow.status;

        if from == status {
            if let Some(chunk) = logs.filter(|l| !l.is_empty()) {
                workflow.append_logs(chunk);
                workflow.updated_at = Utc::now();
                self.persist(&workflow).await?;
            }
            debug!(workflow_id = %id, %status, "repeated status report");
            return Ok(workflow);
        }

        if !from.can_transition_to(status) {
            return Err(ControllerError::IllegalTransition { from, to: status });
        }

        workflow.apply_status(status, Utc::now());
        if let Some(chunk) = logs {
            workflow.append_logs(chunk);
        }
        self.persist(&workflow).await?;
        info!(workflow_id = %id, %from, to = %status, "workflow status changed");
        Ok(workflow)
    }

    /// Append engine output without changing the status.
    pub async fn append_logs(&self, id: &WorkflowId, logs: &str) -> Result<Workflow, ControllerError> {
        let _guard = self.locks.acquire(id).await;
        let mut workflow = self.get(id).await?;
        if !logs.is_empty() {
            workflow.append_logs(logs);
            workflow.updated_at = Utc::now();
            self.persist(&workflow).await?;
        }
        Ok(workflow)
    }

    /// Fold an engine progress report into the workflow's job progress.
    pub async fn update_progress(
        &self,
        id: &WorkflowId,
        progress: &ProgressUpdate,
    ) -> Result<Workflow, ControllerError> {
        let _guard = self.locks.acquire(id).await;
        let mut workflow = self.get(id).await?;
        let before = workflow.job_progress.clone();
        workflow.job_progress.merge(progress);
        if workflow.job_progress != before {
            workflow.updated_at = Utc::now();
            self.persist(&workflow).await?;
            debug!(
                workflow_id = %id,
                total = workflow.job_progress.total.total,
                running = workflow.job_progress.running.total,
                finished = workflow.job_progress.finished.total,
                failed = workflow.job_progress.failed.total,
                "job progress updated"
            );
        }
        Ok(workflow)
    }

    /// Delete a terminal workflow according to the deletion policy.
    ///
    /// Returns the record as it was before deletion.
    pub async fn delete(&self, id: &WorkflowId) -> Result<Workflow, ControllerError> {
        let guard = self.locks.acquire(id).await;
        let workflow = self.get(id).await?;
        if !workflow.status.is_terminal() {
            return Err(ControllerError::WorkflowActive {
                id: *id,
                status: workflow.status,
            });
        }

        let result = match self.deletion_policy {
            DeletionPolicy::Hard => self.repo.delete(id).await,
            DeletionPolicy::Soft => self.repo.mark_deleted(id, Utc::now()).await,
        };
        result.map_err(|e| self.not_found_as(id, e))?;
        drop(guard);

        info!(
            workflow_id = %id,
            name = %workflow.name,
            policy = ?self.deletion_policy,
            "workflow deleted"
        );
        Ok(workflow)
    }

    /// Remove a record regardless of its status. Only for submission rollback.
    pub(crate) async fn discard(&self, id: &WorkflowId) -> Result<(), ControllerError> {
        let _guard = self.locks.acquire(id).await;
        match self.repo.delete(id).await {
            Ok(()) | Err(RepositoryError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, workflow: &Workflow) -> Result<(), ControllerError> {
        self.repo
            .update(workflow)
            .await
            .map_err(|e| self.not_found_as(&workflow.id, e))
    }

    fn not_found_as(&self, id: &WorkflowId, e: RepositoryError) -> ControllerError {
        match e {
            RepositoryError::NotFound => ControllerError::NotFound(id.to_string()),
            other => other.into(),
        }
    }
}
