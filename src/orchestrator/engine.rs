use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::result_block::{ResultBlock, parse_result_block};
use super::scope::{attribute_files, merge_report};
use crate::cache::BinaryResolver;
use crate::config::{DispatchConfig, OrchestratorConfig};
use crate::error::{DispatchError, Result};
use crate::events::{EventKind, EventLog};
use crate::execution::ExecutionResult;
use crate::instruction::{Instruction, InstructionBuilder};
use crate::plan::{
    FileScope, ParallelPlanRequest, PlanResult, PlanStatus, PlanStep, QuickTaskRequest,
    SequentialPlanRequest, StepOutcome,
};
use crate::rate::RateBalancer;
use crate::runner::ProcessRunner;
use crate::strategy::{CliStrategy, StrategyRegistry, TaskType};

/// Drives quick tasks and plans through one backend strategy.
///
/// Sequential plans run one subprocess per step, in order, without stopping
/// on failure. Parallel plans run exactly one subprocess carrying every task
/// and recover per-task status from the structured block it prints.
pub struct PlanOrchestrator {
    strategy: Arc<dyn CliStrategy>,
    runner: ProcessRunner,
    builder: InstructionBuilder,
    config: OrchestratorConfig,
    rate: Option<Arc<RateBalancer>>,
    resolver: Option<Arc<BinaryResolver>>,
    events: Option<EventLog>,
}

impl PlanOrchestrator {
    pub fn new(
        strategy: Arc<dyn CliStrategy>,
        runner: ProcessRunner,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            strategy,
            runner,
            builder: InstructionBuilder::new(),
            config,
            rate: None,
            resolver: None,
            events: None,
        }
    }

    /// Wire up everything from configuration: the selected backend, runner,
    /// rate balancer, binary resolver and (when enabled) the event log.
    pub fn from_config(
        config: &DispatchConfig,
        registry: &StrategyRegistry,
        backend: Option<&str>,
        repo_root: &Path,
    ) -> Result<Self> {
        let name = backend.unwrap_or(&config.default_backend);
        let strategy = registry.create(name, config)?;
        info!(backend = strategy.name(), "Selected backend");

        let mut orchestrator = Self::new(
            strategy,
            ProcessRunner::from_config(&config.runner),
            config.orchestrator.clone(),
        )
        .with_rate_balancer(Arc::new(RateBalancer::new(config.rate_limit.clone())))
        .with_resolver(Arc::new(BinaryResolver::from_config(&config.cache)));

        if config.logging.enabled {
            let events = EventLog::with_new_session(config.logging.resolve_dir(repo_root));
            orchestrator = orchestrator.with_event_log(events);
        }
        Ok(orchestrator)
    }

    pub fn with_builder(mut self, builder: InstructionBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_rate_balancer(mut self, rate: Arc<RateBalancer>) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<BinaryResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn strategy(&self) -> &dyn CliStrategy {
        self.strategy.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.events.as_ref().map(EventLog::session_id)
    }

    pub fn event_log(&self) -> Option<&EventLog> {
        self.events.as_ref()
    }

    fn effective_fanout(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_fanout)
            .clamp(1, self.config.max_fanout.max(1))
    }

    /// Step budget if set, else the configured override, else the backend default.
    pub fn step_timeout(&self, step: &PlanStep) -> Duration {
        step.constraints
            .time_budget_seconds
            .filter(|secs| *secs > 0)
            .or(self.config.sequential_step_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.strategy.get_timeout(TaskType::Sequential))
    }

    /// Sum of the per-step timeouts.
    pub fn sequential_timeout_estimate(&self, steps: &[PlanStep]) -> Duration {
        steps.iter().map(|step| self.step_timeout(step)).sum()
    }

    /// `base + per_task × n / fanout`, bounded by the backend's parallel
    /// ceiling and kept below the sequential estimate for the same steps.
    pub fn parallel_timeout_estimate(&self, steps: &[PlanStep], fanout: usize) -> Duration {
        let fanout = fanout.max(1) as u64;
        let tasks = steps.len() as u64;
        let amortized = (self.config.parallel_per_task_secs * tasks).div_ceil(fanout);
        let estimate = Duration::from_secs(self.config.parallel_base_timeout_secs + amortized)
            .min(self.strategy.get_timeout(TaskType::Parallel));

        let sequential = self.sequential_timeout_estimate(steps);
        let margin = (sequential / 2).min(Duration::from_secs(1));
        estimate.min(sequential.saturating_sub(margin))
    }

    pub async fn run_quick(&self, request: &QuickTaskRequest) -> Result<ExecutionResult> {
        request.validate()?;
        let instruction = self.builder.quick(
            &request.repo_root,
            &request.task,
            &request.file_scope,
            request.mode,
        );
        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.strategy.get_timeout(TaskType::Quick));

        self.record(
            None,
            EventKind::PlanStarted {
                mode: TaskType::Quick.as_str().into(),
                backend: self.strategy.name().into(),
                steps: 1,
            },
        )
        .await;

        let result = self
            .dispatch(None, &instruction, request.model.as_deref(), timeout, &request.repo_root)
            .await?;
        Ok(self.finish_result(result))
    }

    pub async fn run_sequential(&self, request: &SequentialPlanRequest) -> Result<PlanResult> {
        request.validate()?;
        let started = Instant::now();
        let plan_id = request.plan_id.as_deref();
        let total = request.steps.len();

        info!(
            backend = self.strategy.name(),
            steps = total,
            estimate_secs = self.sequential_timeout_estimate(&request.steps).as_secs(),
            "Starting sequential plan"
        );
        self.record(
            plan_id,
            EventKind::PlanStarted {
                mode: TaskType::Sequential.as_str().into(),
                backend: self.strategy.name().into(),
                steps: total,
            },
        )
        .await;

        let mut outcomes = Vec::with_capacity(total);
        for (index, step) in request.steps.iter().enumerate() {
            let instruction =
                self.builder
                    .plan_step(&request.repo_root, step, &request.file_scope, request.mode);
            let timeout = self.step_timeout(step);
            debug!(step = %step.id, timeout_secs = timeout.as_secs(), "Dispatching step");

            let result = self
                .dispatch(
                    plan_id,
                    &instruction,
                    request.model.as_deref(),
                    timeout,
                    &request.repo_root,
                )
                .await?;
            info!(
                step = %step.id,
                progress = %format!("{}/{}", index + 1, total),
                success = result.success,
                "Step finished"
            );
            outcomes.push(StepOutcome::new(step, self.finish_result(result)));
        }

        let mut plan = PlanResult::from_steps(outcomes);
        plan.elapsed_ms = started.elapsed().as_millis() as u64;
        self.record(plan_id, EventKind::plan_finished(&plan)).await;
        info!(
            status = %plan.status,
            ok = plan.succeeded(),
            failed = plan.failed(),
            "Sequential plan finished"
        );
        Ok(plan)
    }

    pub async fn run_parallel(&self, request: &ParallelPlanRequest) -> Result<PlanResult> {
        request.validate()?;
        let started = Instant::now();
        let plan_id = request.plan_id.as_deref();
        let fanout = self.effective_fanout(request.fanout);

        let instruction =
            self.builder
                .parallel(&request.repo_root, &request.steps, &request.file_scope, fanout);
        let scopes: Vec<(String, FileScope)> = request
            .steps
            .iter()
            .map(|step| (step.id.clone(), request.file_scope.merged_with(&step.file_scope)))
            .collect();
        let report = merge_report(&scopes);
        if !report.disjoint {
            warn!(
                overlaps = report.overlaps.len(),
                "Parallel task scopes overlap; isolation is advisory only"
            );
        }

        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.parallel_timeout_estimate(&request.steps, fanout));
        info!(
            backend = self.strategy.name(),
            tasks = request.steps.len(),
            fanout,
            timeout_secs = timeout.as_secs(),
            "Starting parallel plan as a single invocation"
        );
        self.record(
            plan_id,
            EventKind::PlanStarted {
                mode: TaskType::Parallel.as_str().into(),
                backend: self.strategy.name().into(),
                steps: request.steps.len(),
            },
        )
        .await;

        let invocation = self
            .dispatch(
                plan_id,
                &instruction,
                request.model.as_deref(),
                timeout,
                &request.repo_root,
            )
            .await?;

        let block = parse_result_block(&invocation.stdout)
            .or_else(|| {
                parse_result_block(&format!("{}\n{}", invocation.stdout, invocation.stderr))
            });
        let (status, steps, touched_files) = match &block {
            Some(block) => {
                let touched = union(&block.files_modified, &invocation.touched_files);
                let owned = attribute_files(&touched, &scopes);
                let steps: Vec<StepOutcome> = request
                    .steps
                    .iter()
                    .map(|step| {
                        let files = owned.get(&step.id).cloned().unwrap_or_default();
                        StepOutcome::new(step, task_result(step, block, &invocation, files))
                    })
                    .collect();
                (PlanStatus::from_reported(&block.status), steps, touched)
            }
            None => {
                warn!("No structured result block in backend output; failing every task");
                let steps: Vec<StepOutcome> = request
                    .steps
                    .iter()
                    .map(|step| StepOutcome::new(step, missing_block_result(&invocation)))
                    .collect();
                (PlanStatus::Error, steps, invocation.touched_files.clone())
            }
        };

        let plan = PlanResult {
            status,
            steps,
            touched_files,
            merge_report: Some(report),
            invocation: Some(self.finish_result(invocation)),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        self.record(plan_id, EventKind::plan_finished(&plan)).await;
        info!(
            status = %plan.status,
            ok = plan.succeeded(),
            failed = plan.failed(),
            "Parallel plan finished"
        );
        Ok(plan)
    }

    /// Build, resolve and run one instruction. Retryable results are retried
    /// through the rate balancer when one is attached; when retries run out the
    /// last result is returned rather than an error.
    async fn dispatch(
        &self,
        plan_id: Option<&str>,
        instruction: &Instruction,
        model: Option<&str>,
        timeout: Duration,
        repo_root: &Path,
    ) -> Result<ExecutionResult> {
        let mut spec = self.strategy.build_command(instruction, model)?;
        if let Some(resolver) = &self.resolver {
            let resolved = resolver.resolve(self.strategy.name(), spec.program())?;
            if let Some(program) = spec.argv.first_mut() {
                *program = resolved.to_string_lossy().into_owned();
            }
        }

        let label = instruction.label();
        self.record(
            plan_id,
            EventKind::command_started(&label, &spec, timeout.as_secs()),
        )
        .await;

        let result = match &self.rate {
            Some(rate) => {
                let client_id = repo_root.display().to_string();
                let retry = rate.config().retry.clone();
                let spec = &spec;
                let outcome = rate
                    .execute_with_retry(self.strategy.name(), &retry, &client_id, || async move {
                        let result = self
                            .runner
                            .execute(self.strategy.as_ref(), spec, timeout)
                            .await;
                        if result.retryable {
                            Err(DispatchError::TransientFailure(Box::new(result)))
                        } else {
                            Ok(result)
                        }
                    })
                    .await;
                match outcome {
                    Ok(result) => result,
                    Err(DispatchError::TransientFailure(last)) => *last,
                    Err(e) => return Err(e),
                }
            }
            None => {
                self.runner
                    .execute(self.strategy.as_ref(), &spec, timeout)
                    .await
            }
        };

        self.record(plan_id, EventKind::result_recorded(&label, &result))
            .await;
        Ok(result)
    }

    fn finish_result(&self, result: ExecutionResult) -> ExecutionResult {
        if self.config.keep_raw_output {
            result
        } else {
            result.without_output()
        }
    }

    async fn record(&self, plan_id: Option<&str>, kind: EventKind) {
        if let Some(events) = &self.events {
            events.record(plan_id, kind).await;
        }
    }
}

fn union(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .iter()
        .chain(second)
        .filter(|f| seen.insert(f.as_str()))
        .cloned()
        .collect()
}

/// Per-task result recovered from the combined invocation's report.
fn task_result(
    step: &PlanStep,
    block: &ResultBlock,
    invocation: &ExecutionResult,
    files: Vec<String>,
) -> ExecutionResult {
    let model = invocation.model.as_str();
    let exit_code = invocation.exit_code;
    if block.failed(&step.id) {
        let summary = block
            .summary_for(&step.id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Task {} reported failed", step.id));
        ExecutionResult::failure(model, summary, String::new(), exit_code)
    } else if block.completed(&step.id) {
        let summary = block
            .summary_for(&step.id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Task {} completed", step.id));
        ExecutionResult::success(model, summary, files, exit_code)
    } else {
        ExecutionResult::failure(
            model,
            format!("Task {} missing from backend report", step.id),
            String::new(),
            exit_code,
        )
    }
    .with_elapsed(Duration::from_millis(invocation.elapsed_ms))
}

fn missing_block_result(invocation: &ExecutionResult) -> ExecutionResult {
    let notes = if invocation.success {
        "Backend finished without printing a structured result block".to_string()
    } else {
        invocation.summary.clone()
    };
    ExecutionResult::failure(
        invocation.model.as_str(),
        "No per-task result reported",
        notes,
        invocation.exit_code,
    )
    .with_elapsed(Duration::from_millis(invocation.elapsed_ms))
}
