use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CommandSpec;
use crate::error::Result;
use crate::execution::ExecutionResult;
use crate::instruction::Instruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Quick,
    Sequential,
    Parallel,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

/// Static feature description of a backend, consulted when one is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub file_context: bool,
    pub model_routing: bool,
    /// Talks to the provider directly rather than through OpenRouter.
    pub native_endpoint: bool,
    pub sessions: bool,
    pub preferred_task_types: &'static [TaskType],
    /// Context files beyond this count are dropped from the command line.
    pub context_file_soft_limit: usize,
}

impl Capabilities {
    pub fn prefers(&self, task_type: TaskType) -> bool {
        self.preferred_task_types.contains(&task_type)
    }
}

/// Adapter for one coding-agent CLI.
pub trait CliStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &Capabilities;

    /// Build the subprocess invocation. Deterministic for identical inputs and
    /// fails before anything is spawned when credentials are missing.
    fn build_command(
        &self,
        instruction: &Instruction,
        model_override: Option<&str>,
    ) -> Result<CommandSpec>;

    /// Classify a completed invocation. Exit code 0 alone does not mean success.
    fn parse_output(&self, stdout: &str, stderr: &str, exit_code: i32) -> ExecutionResult;

    fn should_retry(&self, stdout: &str, stderr: &str, exit_code: i32) -> bool {
        self.parse_output(stdout, stderr, exit_code).retryable
    }

    fn get_timeout(&self, task_type: TaskType) -> Duration;
}
