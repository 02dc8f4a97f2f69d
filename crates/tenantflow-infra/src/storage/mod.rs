//! Shared-volume adapters.
//!
//! Implements the `WorkspaceAllocator` trait from `tenantflow-core` on the
//! local filesystem, plus data-directory resolution.

pub mod workspace;

use std::path::PathBuf;

pub use workspace::LocalWorkspaceAllocator;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `TENANTFLOW_DATA_DIR` environment variable
/// 2. `~/.tenantflow`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TENANTFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".tenantflow");
    }

    // Last resort: current directory
    PathBuf::from(".tenantflow")
}
