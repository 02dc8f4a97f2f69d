//! Business logic services (use cases).
//!
//! Services orchestrate repository calls, workspace allocation, engine
//! dispatch and the workflow state machine. They depend on traits (ports),
//! never on concrete infrastructure implementations.

pub mod lifecycle;
pub mod naming;
pub mod registry;
pub mod store;
