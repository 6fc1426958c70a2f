pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod instruction;
pub mod orchestrator;
pub mod output;
pub mod plan;
pub mod rate;
pub mod runner;
pub mod strategy;
pub mod utils;

pub use cache::{BinaryResolver, TtlCache};
pub use config::DispatchConfig;
pub use error::{DispatchError, Result};
pub use events::{EventKind, EventLog};
pub use execution::ExecutionResult;
pub use instruction::{Instruction, InstructionBuilder, Mode};
pub use orchestrator::{PlanOrchestrator, ResultBlock, merge_report, parse_result_block};
pub use plan::{
    FileScope, ParallelPlanRequest, PlanDocument, PlanResult, PlanStatus, PlanStep,
    QuickTaskRequest, SequentialPlanRequest,
};
pub use rate::RateBalancer;
pub use runner::ProcessRunner;
pub use strategy::{
    AiderStrategy, CliStrategy, CommandSpec, OpenCodeStrategy, StrategyRegistry, TaskType,
};
