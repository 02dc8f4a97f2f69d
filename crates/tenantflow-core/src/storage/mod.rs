//! Shared-volume abstractions.
//!
//! Defines the workspace allocator trait. The local-disk implementation lives
//! in tenantflow-infra.

pub mod workspace;

pub use workspace::WorkspaceAllocator;
