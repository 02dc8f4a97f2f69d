//! Workspace allocator trait.
//!
//! Every workflow owns exactly one directory on the shared volume:
//! `<root>/<organization>/<workflow id>/`.

use std::path::{Path, PathBuf};

use tenantflow_types::error::ControllerError;
use tenantflow_types::workflow::{WorkflowId, WorkspaceFile};

/// Allocates and releases per-workflow workspaces.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait WorkspaceAllocator: Send + Sync {
    /// Compute the workspace path without touching the disk.
    fn workspace_path(&self, organization: &str, workflow_id: &WorkflowId) -> PathBuf;

    /// Create the workspace directory.
    ///
    /// Atomic create-if-absent: an existing directory is `WorkspaceExists`.
    fn reserve(
        &self,
        organization: &str,
        workflow_id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<PathBuf, ControllerError>> + Send;

    /// Recursively remove the workspace. A missing directory is success.
    fn release(
        &self,
        organization: &str,
        workflow_id: &WorkflowId,
    ) -> impl std::future::Future<Output = Result<(), ControllerError>> + Send;

    /// Regular files under a workspace, relative names, sorted by name.
    fn list_files(
        &self,
        workspace: &Path,
    ) -> impl std::future::Future<Output = Result<Vec<WorkspaceFile>, ControllerError>> + Send;
}
