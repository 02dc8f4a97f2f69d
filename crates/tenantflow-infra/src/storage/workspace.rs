//! Local-disk workspace allocator.
//!
//! Layout: `<root>/<organization>/<workflow id>/`. Reservation relies on
//! `create_dir` failing with `AlreadyExists`, so two reservations of the same
//! path can never both succeed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tenantflow_core::storage::WorkspaceAllocator;
use tenantflow_types::error::ControllerError;
use tenantflow_types::workflow::{WorkflowId, WorkspaceFile};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LocalWorkspaceAllocator {
    root: PathBuf,
}

impl LocalWorkspaceAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Flush the directory entry changes of `dir` to disk.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl WorkspaceAllocator for LocalWorkspaceAllocator {
    fn workspace_path(&self, organization: &str, workflow_id: &WorkflowId) -> PathBuf {
        self.root.join(organization).join(workflow_id.to_string())
    }

    async fn reserve(
        &self,
        organization: &str,
        workflow_id: &WorkflowId,
    ) -> Result<PathBuf, ControllerError> {
        let path = self.workspace_path(organization, workflow_id);
        let parent = self.root.join(organization);
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| ControllerError::storage_io(&parent, e))?;

        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "workspace reserved");
                Ok(path)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(ControllerError::WorkspaceExists(path))
            }
            Err(e) => Err(ControllerError::storage_io(path, e)),
        }
    }

    async fn release(
        &self,
        organization: &str,
        workflow_id: &WorkflowId,
    ) -> Result<(), ControllerError> {
        let path = self.workspace_path(organization, workflow_id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "workspace already gone");
                return Ok(());
            }
            Err(e) => return Err(ControllerError::storage_io(path, e)),
        }

        let parent = self.root.join(organization);
        sync_dir(&parent)
            .await
            .map_err(|e| ControllerError::storage_io(&parent, e))?;
        info!(path = %path.display(), "workspace released");
        Ok(())
    }

    async fn list_files(&self, workspace: &Path) -> Result<Vec<WorkspaceFile>, ControllerError> {
        let mut files = Vec::new();
        let mut pending = vec![workspace.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| ControllerError::storage_io(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ControllerError::storage_io(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| ControllerError::storage_io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| ControllerError::storage_io(&path, e))?;
                let last_modified: DateTime<Utc> = metadata
                    .modified()
                    .map_err(|e| ControllerError::storage_io(&path, e))?
                    .into();
                files.push(WorkspaceFile {
                    name: relative_name(workspace, &path),
                    size: metadata.len(),
                    last_modified,
                });
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

/// `/`-separated path of `path` relative to `root`.
fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
