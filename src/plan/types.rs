use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::execution::ExecutionResult;
use crate::instruction::Mode;

/// Files a unit of work may see and touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileScope {
    pub context_paths: Vec<String>,
    pub allowed_globs: Vec<String>,
    pub deny_globs: Vec<String>,
}

impl FileScope {
    pub fn new(allowed_globs: Vec<String>, deny_globs: Vec<String>) -> Self {
        Self {
            context_paths: Vec::new(),
            allowed_globs,
            deny_globs,
        }
    }

    pub fn with_context(mut self, paths: Vec<String>) -> Self {
        self.context_paths = paths;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.context_paths.is_empty() && self.allowed_globs.is_empty() && self.deny_globs.is_empty()
    }

    /// Union of both scopes; `self` entries first, duplicates dropped.
    pub fn merged_with(&self, other: &FileScope) -> FileScope {
        FileScope {
            context_paths: union(&self.context_paths, &other.context_paths),
            allowed_globs: union(&self.allowed_globs, &other.allowed_globs),
            deny_globs: union(&self.deny_globs, &other.deny_globs),
        }
    }
}

fn union(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .iter()
        .chain(second.iter())
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPlan {
    pub unit: Vec<String>,
    pub e2e: Vec<String>,
}

impl TestPlan {
    pub fn is_empty(&self) -> bool {
        self.unit.is_empty() && self.e2e.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConstraints {
    pub max_tokens: Option<u32>,
    pub time_budget_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub task: String,
    #[serde(default)]
    pub file_scope: FileScope,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub test_plan: TestPlan,
    #[serde(default)]
    pub constraints: StepConstraints,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, task: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            task: task.into(),
            file_scope: FileScope::default(),
            max_iterations: None,
            test_plan: TestPlan::default(),
            constraints: StepConstraints::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_scope(mut self, scope: FileScope) -> Self {
        self.file_scope = scope;
        self
    }

    pub fn with_time_budget(mut self, secs: u64) -> Self {
        self.constraints.time_budget_seconds = Some(secs);
        self
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

fn validate_steps(steps: &[PlanStep]) -> Result<()> {
    if steps.is_empty() {
        return Err(DispatchError::InvalidPlan("plan has no steps".into()));
    }
    let mut ids = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(DispatchError::InvalidPlan("step id must not be empty".into()));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(DispatchError::InvalidPlan(format!(
                "duplicate step id: {}",
                step.id
            )));
        }
        if step.task.trim().is_empty() {
            return Err(DispatchError::InvalidPlan(format!(
                "step {} has an empty task",
                step.id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickTaskRequest {
    pub task: String,
    pub repo_root: PathBuf,
    #[serde(default)]
    pub file_scope: FileScope,
    #[serde(default = "Mode::quick")]
    pub mode: Mode,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl QuickTaskRequest {
    pub fn new(task: impl Into<String>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            task: task.into(),
            repo_root: repo_root.into(),
            file_scope: FileScope::default(),
            mode: Mode::Quick,
            model: None,
            timeout_secs: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.task.trim().is_empty() {
            return Err(DispatchError::InvalidPlan("task must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialPlanRequest {
    #[serde(default)]
    pub plan_id: Option<String>,
    pub repo_root: PathBuf,
    pub steps: Vec<PlanStep>,
    /// Plan-level scope merged into every step.
    #[serde(default)]
    pub file_scope: FileScope,
    #[serde(default = "Mode::full")]
    pub mode: Mode,
    #[serde(default)]
    pub model: Option<String>,
}

impl SequentialPlanRequest {
    pub fn new(repo_root: impl Into<PathBuf>, steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: None,
            repo_root: repo_root.into(),
            steps,
            file_scope: FileScope::default(),
            mode: Mode::Full,
            model: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_steps(&self.steps)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPlanRequest {
    #[serde(default)]
    pub plan_id: Option<String>,
    pub repo_root: PathBuf,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub file_scope: FileScope,
    #[serde(default)]
    pub fanout: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ParallelPlanRequest {
    pub fn new(repo_root: impl Into<PathBuf>, steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: None,
            repo_root: repo_root.into(),
            steps,
            file_scope: FileScope::default(),
            fanout: None,
            model: None,
            timeout_secs: None,
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_steps(&self.steps)?;
        if self.fanout == Some(0) {
            return Err(DispatchError::InvalidPlan("fanout must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Ok,
    Partial,
    Error,
}

impl PlanStatus {
    /// `Ok` iff every step succeeded, `Error` iff none did (or there were none).
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        let (mut succeeded, mut failed) = (0usize, 0usize);
        for success in outcomes {
            if success {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }
        match (succeeded, failed) {
            (0, _) => Self::Error,
            (_, 0) => Self::Ok,
            _ => Self::Partial,
        }
    }

    /// Status word reported by a backend in its structured result block.
    pub fn from_reported(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "success" => Self::Ok,
            "partial" => Self::Partial,
            _ => Self::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub title: String,
    pub result: ExecutionResult,
}

impl StepOutcome {
    pub fn new(step: &PlanStep, result: ExecutionResult) -> Self {
        Self {
            step_id: step.id.clone(),
            title: step.display_title().to_string(),
            result,
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.result.success { "ok" } else { "fail" }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeOverlap {
    pub first: String,
    pub second: String,
    pub reason: String,
}

/// How a parallel plan's per-task scopes were kept apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub strategy: String,
    /// Scopes are described to the backend, not enforced by the engine.
    pub enforcement: String,
    pub disjoint: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlaps: Vec<ScopeOverlap>,
    pub task_scopes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub status: PlanStatus,
    pub steps: Vec<StepOutcome>,
    pub touched_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_report: Option<MergeReport>,
    /// The single combined invocation of a parallel plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<ExecutionResult>,
    pub elapsed_ms: u64,
}

impl PlanResult {
    /// Aggregate sequential outcomes: status from per-step success, touched files unioned.
    pub fn from_steps(steps: Vec<StepOutcome>) -> Self {
        let status = PlanStatus::from_outcomes(steps.iter().map(|s| s.result.success));
        let mut seen = HashSet::new();
        let touched_files = steps
            .iter()
            .flat_map(|s| s.result.touched_files.iter())
            .filter(|f| seen.insert(f.as_str()))
            .cloned()
            .collect();
        Self {
            status,
            steps,
            touched_files,
            merge_report: None,
            invocation: None,
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.result.success).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.succeeded()
    }
}
