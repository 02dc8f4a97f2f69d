//! Shared domain types for tenantflow.
//!
//! This crate contains the domain types used across the controller:
//! organizations, users, workflows, controller configuration, and the
//! error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod tenant;
pub mod workflow;
