//! Quick tasks, sequential plans and single-invocation parallel plans.

mod engine;
mod result_block;
mod scope;

pub use engine::PlanOrchestrator;
pub use result_block::{ResultBlock, parse_result_block};
pub use scope::{
    ENFORCEMENT_ADVISORY, ISOLATION_STRATEGY, attribute_files, glob_matches, merge_report,
};
