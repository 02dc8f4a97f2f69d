//! In-memory repository adapters.
//!
//! Backed by `DashMap` so concurrent callers contend per shard rather than on
//! one global lock. Cloning an adapter shares the underlying state. Values are
//! cloned out on read; no guard is ever held across `.await`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tenantflow_types::error::RepositoryError;
use tenantflow_types::tenant::{Organization, OrganizationId, User, UserId};
use tenantflow_types::workflow::{Workflow, WorkflowId, WorkflowStatus};

use super::tenant::TenantRepository;
use super::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Tenants
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TenantState {
    organizations: DashMap<OrganizationId, Organization>,
    organization_names: DashMap<String, OrganizationId>,
    users: DashMap<UserId, User>,
    emails: DashMap<String, UserId>,
    memberships: DashSet<(OrganizationId, UserId)>,
}

/// In-memory implementation of `TenantRepository`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTenantRepository {
    inner: Arc<TenantState>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantRepository for InMemoryTenantRepository {
    async fn create_organization(
        &self,
        organization: &Organization,
    ) -> Result<Organization, RepositoryError> {
        match self.inner.organization_names.entry(organization.name.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "organization '{}' already exists",
                organization.name
            ))),
            Entry::Vacant(slot) => {
                self.inner
                    .organizations
                    .insert(organization.id, organization.clone());
                slot.insert(organization.id);
                Ok(organization.clone())
            }
        }
    }

    async fn get_organization(
        &self,
        id: &OrganizationId,
    ) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.inner.organizations.get(id).map(|r| r.value().clone()))
    }

    async fn get_organization_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Organization>, RepositoryError> {
        let id = self.inner.organization_names.get(name).map(|r| *r.value());
        Ok(id.and_then(|id| self.inner.organizations.get(&id).map(|r| r.value().clone())))
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, RepositoryError> {
        let mut organizations: Vec<Organization> = self
            .inner
            .organizations
            .iter()
            .map(|r| r.value().clone())
            .collect();
        organizations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(organizations)
    }

    async fn create_user(&self, user: &User) -> Result<User, RepositoryError> {
        match self.inner.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "user '{}' already exists",
                user.email
            ))),
            Entry::Vacant(slot) => {
                self.inner.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user.clone())
            }
        }
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.inner.users.get(id).map(|r| r.value().clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let id = self.inner.emails.get(email).map(|r| *r.value());
        Ok(id.and_then(|id| self.inner.users.get(&id).map(|r| r.value().clone())))
    }

    async fn link_user(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        if !self.inner.organizations.contains_key(organization_id)
            || !self.inner.users.contains_key(user_id)
        {
            return Err(RepositoryError::NotFound);
        }
        Ok(self.inner.memberships.insert((*organization_id, *user_id)))
    }

    async fn is_member(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.inner.memberships.contains(&(*organization_id, *user_id)))
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredWorkflow {
    seq: u64,
    workflow: Workflow,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct WorkflowState {
    records: DashMap<WorkflowId, StoredWorkflow>,
    /// (organization, name) -> id for live records only.
    live_names: DashMap<(OrganizationId, String), WorkflowId>,
    sequences: DashMap<OrganizationId, u64>,
    next_seq: AtomicU64,
}

/// In-memory implementation of `WorkflowRepository`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowRepository {
    inner: Arc<WorkflowState>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn release_name(&self, workflow: &Workflow) {
        self.inner.live_names.remove_if(
            &(workflow.organization_id, workflow.name.clone()),
            |_, id| *id == workflow.id,
        );
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn insert(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        if self.inner.records.contains_key(&workflow.id) {
            return Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        match self
            .inner
            .live_names
            .entry((workflow.organization_id, workflow.name.clone()))
        {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "workflow name '{}' already exists",
                workflow.name
            ))),
            Entry::Vacant(slot) => {
                let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
                self.inner.records.insert(
                    workflow.id,
                    StoredWorkflow {
                        seq,
                        workflow: workflow.clone(),
                        deleted_at: None,
                    },
                );
                slot.insert(workflow.id);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self
            .inner
            .records
            .get(id)
            .filter(|r| r.deleted_at.is_none())
            .map(|r| r.workflow.clone()))
    }

    async fn get_by_name(
        &self,
        organization_id: &OrganizationId,
        name: &str,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let id = self
            .inner
            .live_names
            .get(&(*organization_id, name.to_string()))
            .map(|r| *r.value());
        match id {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        organization_id: &OrganizationId,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let mut rows: Vec<(u64, Workflow)> = self
            .inner
            .records
            .iter()
            .filter(|r| r.deleted_at.is_none())
            .filter(|r| r.workflow.organization_id == *organization_id)
            .filter(|r| status.is_none_or(|s| r.workflow.status == s))
            .map(|r| (r.seq, r.workflow.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, wf)| wf).collect())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        match self.inner.records.get_mut(&workflow.id) {
            Some(mut stored) if stored.deleted_at.is_none() => {
                stored.workflow = workflow.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), RepositoryError> {
        let (_, stored) = self
            .inner
            .records
            .remove(id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.deleted_at.is_none() {
            self.release_name(&stored.workflow);
        }
        Ok(())
    }

    async fn mark_deleted(&self, id: &WorkflowId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let workflow = match self.inner.records.get_mut(id) {
            Some(mut stored) if stored.deleted_at.is_none() => {
                stored.deleted_at = Some(at);
                stored.workflow.clone()
            }
            _ => return Err(RepositoryError::NotFound),
        };
        self.release_name(&workflow);
        Ok(())
    }

    async fn next_name_sequence(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<u64, RepositoryError> {
        let mut value = self.inner.sequences.entry(*organization_id).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}
