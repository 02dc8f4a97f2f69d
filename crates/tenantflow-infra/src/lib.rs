//! Infrastructure layer for tenantflow.
//!
//! Contains implementations of the traits defined in `tenantflow-core`:
//! SQLite repositories, the local shared-volume workspace allocator, the
//! child-process engine dispatcher, and the configuration loader.

pub mod config;
pub mod engine;
pub mod sqlite;
pub mod storage;

#[cfg(all(test, unix))]
mod end_to_end;
