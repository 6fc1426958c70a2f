//! Normalized outcome of a single backend invocation.

mod result;

pub use result::{ExecutionResult, RUNNER_EXIT_CODE};
