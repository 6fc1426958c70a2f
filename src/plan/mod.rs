//! Plan requests and aggregated plan results.

mod document;
mod types;

pub use document::PlanDocument;
pub use types::{
    FileScope, MergeReport, ParallelPlanRequest, PlanResult, PlanStatus, PlanStep,
    QuickTaskRequest, ScopeOverlap, SequentialPlanRequest, StepConstraints, StepOutcome,
    TestPlan,
};
