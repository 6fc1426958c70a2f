//! Machine-readable result output.
//!
//! - `OutputWriter`: JSON rendering of task, plan and backend results
//! - `TaskOutput`, `PlanOutput`: result envelopes with backend and session

mod writer;

pub use writer::{OutputWriter, PlanOutput, TaskOutput};
