//! Subprocess execution with an inactivity clock and an absolute ceiling.

mod process;

pub use process::{ProcessRunner, RunOutcome, RunStatus};
