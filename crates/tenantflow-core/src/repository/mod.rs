//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (tenantflow-infra) implements. The core crate never depends on any
//! specific storage technology. `memory` holds in-process adapters.

pub mod memory;
pub mod tenant;
pub mod workflow;
