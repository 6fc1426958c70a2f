use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::{FileScope, StepConstraints, TestPlan};

pub const INSTRUCTION_VERSION: &str = "1.0";

/// Output contract appended to consolidated parallel instructions.
pub const RESULT_BLOCK_CONTRACT: &str = r#"When every task has been attempted, print exactly one fenced JSON block as the last thing in your output:
```json
{"status": "success" | "partial" | "failed", "steps_completed": ["<task id>"], "steps_failed": ["<task id>"], "summaries": {"<task id>": "<one line>"}, "files_modified": ["<path>"]}
```"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    QuickTask,
    PlanStep,
    TestTask,
    ParallelPlan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Quick,
    Full,
}

impl Mode {
    pub fn quick() -> Self {
        Self::Quick
    }

    pub fn full() -> Self {
        Self::Full
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
        }
    }
}

/// Step metadata carried by `plan_step` instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub test_plan: TestPlan,
    #[serde(default)]
    pub constraints: StepConstraints,
}

/// One task inside a consolidated parallel instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSection {
    pub id: String,
    pub title: String,
    pub task: String,
    pub file_scope: FileScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: InstructionKind,
    pub repo_root: PathBuf,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepDescriptor>,
    pub mode: Mode,
    pub file_scope: FileScope,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub guarantees: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSection>,
}

impl Instruction {
    pub fn file_scope(&self) -> &FileScope {
        &self.file_scope
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == InstructionKind::ParallelPlan
    }

    /// Short identifier used in logs.
    pub fn label(&self) -> String {
        match (&self.step, self.kind) {
            (Some(step), _) => step.id.clone(),
            (None, InstructionKind::ParallelPlan) => format!("parallel[{}]", self.tasks.len()),
            (None, _) => "quick".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render the document as the prompt handed to a backend CLI.
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();

        match &self.step {
            Some(step) => {
                let _ = writeln!(out, "# Step {}: {}", step.id, step.title);
            }
            None if self.is_parallel() => {
                let _ = writeln!(out, "# Parallel plan ({} tasks)", self.tasks.len());
            }
            None => {
                let _ = writeln!(out, "# Task");
            }
        }
        let _ = writeln!(out, "Mode: {}", self.mode.as_str());
        let _ = writeln!(out, "Repository: {}", self.repo_root.display());
        out.push('\n');

        if !self.task.trim().is_empty() {
            out.push_str(self.task.trim());
            out.push_str("\n\n");
        }

        write_scope(&mut out, &self.file_scope, "##");

        if let Some(step) = &self.step {
            write_step_limits(&mut out, step);
        }

        for section in &self.tasks {
            let _ = writeln!(out, "## Task {}: {}", section.id, section.title);
            out.push_str(section.task.trim());
            out.push_str("\n\n");
            write_scope(&mut out, &section.file_scope, "###");
        }

        if !self.instructions.trim().is_empty() {
            let _ = writeln!(out, "## Instructions\n{}\n", self.instructions.trim());
        }
        if !self.guarantees.trim().is_empty() {
            let _ = writeln!(out, "## Guarantees\n{}\n", self.guarantees.trim());
        }
        if self.is_parallel() {
            out.push_str(RESULT_BLOCK_CONTRACT);
            out.push('\n');
        }

        out.trim_end().to_string()
    }
}

fn write_scope(out: &mut String, scope: &FileScope, heading: &str) {
    if !scope.context_paths.is_empty() {
        let _ = writeln!(out, "{heading} Context files");
        for path in &scope.context_paths {
            let _ = writeln!(out, "- {path}");
        }
        out.push('\n');
    }
    if !scope.allowed_globs.is_empty() {
        let _ = writeln!(out, "{heading} Allowed paths (modify only these)");
        for glob in &scope.allowed_globs {
            let _ = writeln!(out, "- {glob}");
        }
        out.push('\n');
    }
    if !scope.deny_globs.is_empty() {
        let _ = writeln!(out, "{heading} Denied paths (never read or write)");
        for glob in &scope.deny_globs {
            let _ = writeln!(out, "- {glob}");
        }
        out.push('\n');
    }
}

fn write_step_limits(out: &mut String, step: &StepDescriptor) {
    let mut limits = Vec::new();
    if let Some(n) = step.max_iterations {
        limits.push(format!("at most {n} edit iterations"));
    }
    if let Some(tokens) = step.constraints.max_tokens {
        limits.push(format!("at most {tokens} output tokens"));
    }
    if let Some(secs) = step.constraints.time_budget_seconds {
        limits.push(format!("finish within {secs} seconds"));
    }
    if !limits.is_empty() {
        let _ = writeln!(out, "## Limits\n{}\n", limits.join("; "));
    }

    if !step.test_plan.is_empty() {
        let _ = writeln!(out, "## Verify with");
        for cmd in step.test_plan.unit.iter().chain(step.test_plan.e2e.iter()) {
            let _ = writeln!(out, "- `{cmd}`");
        }
        out.push('\n');
    }
}
