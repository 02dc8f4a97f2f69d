use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::{WorkflowId, WorkflowStatus};

/// Errors surfaced by the workflow controller.
///
/// Validation and naming errors never leave partial state behind. Storage and
/// repository failures may be transient; `WorkspaceExists` is an internal
/// consistency fault and must not be retried.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("organization '{0}' does not exist")]
    UnknownOrganization(String),

    #[error("user '{user}' is not allowed to act in organization '{organization}'")]
    UnauthorizedUser { user: String, organization: String },

    #[error("workflow name '{name}' is already taken in organization '{organization}'")]
    NameConflict { organization: String, name: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("workflow {id} is {status}; only finished, failed or stopped workflows can be deleted")]
    WorkflowActive { id: WorkflowId, status: WorkflowStatus },

    #[error("workspace already exists at {0} (consistency fault)")]
    WorkspaceExists(PathBuf),

    #[error("storage I/O error at {path}: {source}")]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("engine error: {0}")]
    Engine(String),
}

impl ControllerError {
    pub fn storage_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ControllerError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// Invariant violations: bugs, not user errors.
    pub fn is_internal_fault(&self) -> bool {
        matches!(self, ControllerError::WorkspaceExists(_))
    }

    /// Failures that may succeed when the same call is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerError::StorageIo { .. }
                | ControllerError::Repository(RepositoryError::Connection)
                | ControllerError::Engine(_)
        )
    }
}

/// Errors from repository operations (used by trait definitions in tenantflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_display() {
        let err = ControllerError::IllegalTransition {
            from: WorkflowStatus::Finished,
            to: WorkflowStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "illegal status transition from finished to running"
        );
    }

    #[test]
    fn test_workspace_exists_is_internal_fault() {
        let err = ControllerError::WorkspaceExists(PathBuf::from("/reana/default/x"));
        assert!(err.is_internal_fault());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_io_is_retryable() {
        let err = ControllerError::storage_io(
            "/reana",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_retryable());
        assert!(!err.is_internal_fault());
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
