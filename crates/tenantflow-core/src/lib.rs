//! Workflow lifecycle and multi-tenancy services for tenantflow.
//!
//! This crate defines the "ports" (repository, workspace and engine traits)
//! that the infrastructure layer implements, and the services built on them:
//! owner resolution, name assignment, the invariant-enforcing workflow store,
//! and the lifecycle controller. It depends only on `tenantflow-types` --
//! never on `tenantflow-infra` or any database/IO crate.

pub mod engine;
pub mod repository;
pub mod service;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
