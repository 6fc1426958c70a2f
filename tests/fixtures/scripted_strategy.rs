//! Backend stand-in that runs `sh -c` scripts instead of a coding agent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use agent_dispatch::error::Result;
use agent_dispatch::execution::ExecutionResult;
use agent_dispatch::instruction::Instruction;
use agent_dispatch::strategy::{
    COMMON_RULES, Capabilities, CliStrategy, CommandSpec, SignatureTable, TaskType,
    classify_output,
};

pub const SCRIPTED_MODEL: &str = "scripted-model";

static SCRIPTED_CAPABILITIES: Capabilities = Capabilities {
    streaming: true,
    file_context: false,
    model_routing: false,
    native_endpoint: true,
    sessions: false,
    preferred_task_types: &[TaskType::Sequential, TaskType::Parallel],
    context_file_soft_limit: 10,
};

/// Picks a script by instruction label (`quick`, a step id, or `parallel[n]`).
pub struct ScriptedStrategy {
    program: String,
    scripts: HashMap<String, String>,
    default_script: String,
    table: SignatureTable,
    calls: AtomicUsize,
    labels: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    sequential_timeout: Duration,
    parallel_timeout: Duration,
}

impl ScriptedStrategy {
    pub fn new(default_script: impl Into<String>) -> Self {
        Self {
            program: "sh".to_string(),
            scripts: HashMap::new(),
            default_script: default_script.into(),
            table: SignatureTable::compile(&[COMMON_RULES]),
            calls: AtomicUsize::new(0),
            labels: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            sequential_timeout: Duration::from_secs(600),
            parallel_timeout: Duration::from_secs(1_200),
        }
    }

    pub fn with_script(mut self, label: &str, script: impl Into<String>) -> Self {
        self.scripts.insert(label.to_string(), script.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeouts(mut self, sequential: Duration, parallel: Duration) -> Self {
        self.sequential_timeout = sequential;
        self.parallel_timeout = parallel;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl CliStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &Capabilities {
        &SCRIPTED_CAPABILITIES
    }

    fn build_command(
        &self,
        instruction: &Instruction,
        model_override: Option<&str>,
    ) -> Result<CommandSpec> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let label = instruction.label();
        let script = self
            .scripts
            .get(&label)
            .unwrap_or(&self.default_script)
            .clone();
        self.labels.lock().push(label);
        self.prompts.lock().push(instruction.to_prompt());

        Ok(CommandSpec::new(
            vec![self.program.clone(), "-c".to_string(), script],
            instruction.repo_root.clone(),
        )
        .with_metadata("backend", "scripted")
        .with_metadata("model", model_override.unwrap_or(SCRIPTED_MODEL)))
    }

    fn parse_output(&self, stdout: &str, stderr: &str, exit_code: i32) -> ExecutionResult {
        classify_output("scripted", &self.table, stdout, stderr, exit_code)
    }

    fn get_timeout(&self, task_type: TaskType) -> Duration {
        match task_type {
            TaskType::Quick => Duration::from_secs(300),
            TaskType::Sequential => self.sequential_timeout,
            TaskType::Parallel => self.parallel_timeout,
        }
    }
}
