//! Workflow repository trait definition.
//!
//! The raw storage port for workflow records. Invariants (engine support,
//! ownership, transition legality, per-record serialization) are enforced one
//! layer up by `service::store::WorkflowStore`, never trusted to implementations.

use chrono::{DateTime, Utc};
use tenantflow_types::error::RepositoryError;
use tenantflow_types::tenant::OrganizationId;
use tenantflow_types::workflow::{Workflow, WorkflowId, WorkflowStatus};

/// Repository trait for workflow persistence.
///
/// Soft-deleted records are invisible to every read method.
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new record. `Conflict` if the name is live in the organization.
    fn insert(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    fn get_by_name(
        &self,
        organization_id: &OrganizationId,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// List an organization's workflows in creation order.
    fn list(
        &self,
        organization_id: &OrganizationId,
        status: Option<WorkflowStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Persist status, logs and timestamps of an existing record.
    fn update(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Permanently remove a record. `NotFound` if absent.
    fn delete(
        &self,
        id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Tombstone a record. `NotFound` if absent.
    fn mark_deleted(
        &self,
        id: &WorkflowId,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically advance and return the organization's name sequence (starts at 1).
    fn next_name_sequence(
        &self,
        organization_id: &OrganizationId,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
