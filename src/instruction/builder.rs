use std::path::Path;

use super::document::{
    INSTRUCTION_VERSION, Instruction, InstructionKind, Mode, StepDescriptor, TaskSection,
};
use crate::plan::{FileScope, PlanStep};

pub const DEFAULT_GUARANTEES: &str = "Modify only files matching the allowed paths. \
Never read or write files matching the denied paths. Do not commit, push or change git \
configuration. Scope rules are checked by the caller after you finish.";

const PARALLEL_INSTRUCTIONS: &str = "The tasks below have non-overlapping file scopes and may \
be worked on concurrently. Keep every edit inside the scope of the task it belongs to. \
A failure in one task must not stop the others.";

/// Builds instruction documents from caller requests.
#[derive(Debug, Clone)]
pub struct InstructionBuilder {
    guarantees: String,
}

impl Default for InstructionBuilder {
    fn default() -> Self {
        Self {
            guarantees: DEFAULT_GUARANTEES.to_string(),
        }
    }
}

impl InstructionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guarantees(mut self, guarantees: impl Into<String>) -> Self {
        self.guarantees = guarantees.into();
        self
    }

    fn base(&self, kind: InstructionKind, repo_root: &Path, task: &str, mode: Mode) -> Instruction {
        Instruction {
            version: INSTRUCTION_VERSION.to_string(),
            kind,
            repo_root: repo_root.to_path_buf(),
            task: task.to_string(),
            step: None,
            mode,
            file_scope: FileScope::default(),
            instructions: String::new(),
            guarantees: self.guarantees.clone(),
            tasks: Vec::new(),
        }
    }

    pub fn quick(
        &self,
        repo_root: &Path,
        task: &str,
        scope: &FileScope,
        mode: Mode,
    ) -> Instruction {
        let mut instruction = self.base(InstructionKind::QuickTask, repo_root, task, mode);
        instruction.file_scope = scope.clone();
        instruction
    }

    /// One plan step; plan-level globs come first, step-level ones are appended.
    pub fn plan_step(
        &self,
        repo_root: &Path,
        step: &PlanStep,
        plan_scope: &FileScope,
        mode: Mode,
    ) -> Instruction {
        let mut instruction = self.base(InstructionKind::PlanStep, repo_root, &step.task, mode);
        instruction.file_scope = plan_scope.merged_with(&step.file_scope);
        instruction.step = Some(StepDescriptor {
            id: step.id.clone(),
            title: step.display_title().to_string(),
            max_iterations: step.max_iterations,
            test_plan: step.test_plan.clone(),
            constraints: step.constraints.clone(),
        });
        instruction
    }

    /// A single consolidated instruction describing every step as its own task section.
    pub fn parallel(
        &self,
        repo_root: &Path,
        steps: &[PlanStep],
        plan_scope: &FileScope,
        fanout: usize,
    ) -> Instruction {
        let summary = format!(
            "Complete the {} tasks below using up to {} concurrent workers.",
            steps.len(),
            fanout.max(1)
        );
        let mut instruction =
            self.base(InstructionKind::ParallelPlan, repo_root, &summary, Mode::Full);
        instruction.instructions = PARALLEL_INSTRUCTIONS.to_string();
        instruction.file_scope = FileScope::new(Vec::new(), plan_scope.deny_globs.clone());
        instruction.tasks = steps
            .iter()
            .map(|step| TaskSection {
                id: step.id.clone(),
                title: step.display_title().to_string(),
                task: step.task.clone(),
                file_scope: plan_scope.merged_with(&step.file_scope),
            })
            .collect();
        instruction
    }
}
