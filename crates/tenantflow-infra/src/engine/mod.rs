//! Engine dispatcher implementations.

pub mod process;

pub use process::ProcessDispatcher;
