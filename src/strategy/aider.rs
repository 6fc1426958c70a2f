use std::sync::LazyLock;
use std::time::Duration;

use tracing::{debug, warn};

use super::signatures::rule;
use super::{
    COMMON_RULES, Capabilities, CliStrategy, CommandSpec, SignatureCategory, SignatureRule,
    SignatureTable, TaskType, classify_output,
};
use crate::config::BackendSettings;
use crate::error::{DispatchError, Result};
use crate::execution::ExecutionResult;
use crate::instruction::Instruction;

pub const DEFAULT_AIDER_MODEL: &str = "qwen/qwen3-coder";

pub const AIDER_CAPABILITIES: Capabilities = Capabilities {
    streaming: false,
    file_context: true,
    model_routing: true,
    native_endpoint: false,
    sessions: false,
    preferred_task_types: &[TaskType::Quick, TaskType::Sequential],
    context_file_soft_limit: 20,
};

/// Failure modes aider reports while still exiting 0.
const AIDER_RULES: &[SignatureRule] = &[
    rule(
        r"summariz(?:ation|er) (?:unexpectedly )?failed|failed to summarize",
        SignatureCategory::SummarizationFailure,
        false,
    ),
    rule(r"event loop is closed", SignatureCategory::EventLoopClosed, false),
    rule(
        r"response was truncated|hit a token limit|exceeded (?:its )?output limit",
        SignatureCategory::TruncatedResponse,
        false,
    ),
    rule(
        r"did not conform to the edit format",
        SignatureCategory::EditFormatMismatch,
        false,
    ),
];

static AIDER_TABLE: LazyLock<SignatureTable> =
    LazyLock::new(|| SignatureTable::compile(&[AIDER_RULES, COMMON_RULES]));

const FIXED_FLAGS: &[&str] = &[
    "--yes-always",
    "--no-auto-commits",
    "--no-dirty-commits",
    "--no-check-update",
    "--no-pretty",
    "--no-stream",
    "--no-show-model-warnings",
    "--no-analytics",
];

pub struct AiderStrategy {
    settings: BackendSettings,
}

impl AiderStrategy {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }

    fn resolve_model(&self, model_override: Option<&str>) -> String {
        model_override
            .or(self.settings.model.as_deref())
            .unwrap_or(DEFAULT_AIDER_MODEL)
            .to_string()
    }

    /// LiteLLM-style model id with the provider prefix aider routes on.
    fn routed_model(&self, model: &str) -> String {
        let prefix = if self.settings.uses_openrouter() {
            "openrouter/"
        } else {
            "openai/"
        };
        if model.starts_with(prefix) {
            model.to_string()
        } else {
            format!("{prefix}{model}")
        }
    }
}

impl CliStrategy for AiderStrategy {
    fn name(&self) -> &str {
        "aider"
    }

    fn capabilities(&self) -> &Capabilities {
        &AIDER_CAPABILITIES
    }

    fn build_command(
        &self,
        instruction: &Instruction,
        model_override: Option<&str>,
    ) -> Result<CommandSpec> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| DispatchError::MissingCredential {
                backend: "aider".into(),
                variable: "AGENT_DISPATCH_API_KEY".into(),
            })?;

        let model = self.resolve_model(model_override);
        let routed = self.routed_model(&model);

        let mut argv: Vec<String> = vec![self.settings.binary.clone()];
        argv.extend(FIXED_FLAGS.iter().map(|f| f.to_string()));
        argv.extend(["--model".to_string(), routed.clone()]);

        // Native credential flags keep the key out of the inherited environment.
        if self.settings.uses_openrouter() {
            argv.extend(["--api-key".to_string(), format!("openrouter={api_key}")]);
        } else if let Some(base) = &self.settings.api_base {
            argv.extend(["--openai-api-base".to_string(), base.clone()]);
            argv.extend(["--openai-api-key".to_string(), api_key.to_string()]);
        }

        let context = &instruction.file_scope.context_paths;
        let limit = AIDER_CAPABILITIES.context_file_soft_limit;
        if context.len() > limit {
            warn!(
                provided = context.len(),
                limit, "Context file list exceeds aider soft limit, trimming"
            );
        }
        for path in context.iter().take(limit) {
            argv.extend(["--file".to_string(), path.clone()]);
        }

        argv.extend(["--message".to_string(), instruction.to_prompt()]);

        let mut spec = CommandSpec::new(argv, &instruction.repo_root)
            .with_env("PYTHONUNBUFFERED", "1")
            .with_env("NO_COLOR", "1")
            .with_env("TERM", "dumb")
            .with_secret(api_key)
            .with_metadata("backend", "aider")
            .with_metadata("model", routed)
            .with_metadata("instruction", instruction.label());

        if !self.settings.provider_order.is_empty() && self.settings.uses_openrouter() {
            let order = self.settings.provider_order.join(",");
            spec = spec
                .with_env("OPENROUTER_PROVIDER_ORDER", order.clone())
                .with_metadata("provider_order", order);
        }

        debug!(model = %model, files = context.len().min(limit), "Built aider command");
        Ok(spec)
    }

    fn parse_output(&self, stdout: &str, stderr: &str, exit_code: i32) -> ExecutionResult {
        classify_output("aider", &AIDER_TABLE, stdout, stderr, exit_code)
    }

    fn get_timeout(&self, task_type: TaskType) -> Duration {
        let secs = match task_type {
            TaskType::Quick => self.settings.quick_timeout_secs as f64,
            TaskType::Sequential => self.settings.sequential_timeout_secs as f64,
            TaskType::Parallel => {
                self.settings.sequential_timeout_secs as f64 * self.settings.parallel_multiplier
            }
        };
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::instruction::{InstructionBuilder, Mode};
    use crate::plan::FileScope;

    fn instruction_with_context(paths: Vec<String>) -> Instruction {
        InstructionBuilder::new().quick(
            Path::new("/repo"),
            "Add a --verbose flag",
            &FileScope::default().with_context(paths),
            Mode::Quick,
        )
    }

    fn strategy() -> AiderStrategy {
        AiderStrategy::new(BackendSettings::aider().with_api_key("sk-or-secret"))
    }

    #[test]
    fn test_missing_key_fails_before_spawn() {
        let strategy = AiderStrategy::new(BackendSettings::aider());
        let err = strategy
            .build_command(&instruction_with_context(vec![]), None)
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("AGENT_DISPATCH_API_KEY"));
    }

    #[test]
    fn test_openrouter_command() {
        let spec = strategy()
            .build_command(&instruction_with_context(vec!["src/cli.rs".into()]), None)
            .unwrap();

        assert_eq!(spec.program(), "aider");
        assert!(spec.argv.contains(&"--no-auto-commits".to_string()));
        assert!(spec.argv.contains(&"--no-check-update".to_string()));
        let model_idx = spec.argv.iter().position(|a| a == "--model").unwrap();
        assert_eq!(spec.argv[model_idx + 1], "openrouter/qwen/qwen3-coder");
        let file_idx = spec.argv.iter().position(|a| a == "--file").unwrap();
        assert_eq!(spec.argv[file_idx + 1], "src/cli.rs");
        assert_eq!(spec.working_dir, Path::new("/repo"));
        assert_eq!(spec.env["PYTHONUNBUFFERED"], "1");
        assert!(!spec.env.values().any(|v| v.contains("sk-or-secret")));
        assert!(
            !spec
                .redacted_argv()
                .iter()
                .any(|a| a.contains("sk-or-secret"))
        );
    }

    #[test]
    fn test_custom_endpoint_uses_openai_flags() {
        let strategy = AiderStrategy::new(
            BackendSettings::aider()
                .with_api_key("sk-local")
                .with_api_base("http://localhost:8000/v1"),
        );
        let spec = strategy
            .build_command(&instruction_with_context(vec![]), Some("my-model"))
            .unwrap();
        assert!(spec.argv.contains(&"--openai-api-base".to_string()));
        assert!(spec.argv.contains(&"openai/my-model".to_string()));
        assert_eq!(spec.model(), "openai/my-model");
    }

    #[test]
    fn test_build_command_is_deterministic() {
        let instruction = instruction_with_context(vec!["a.rs".into()]);
        let first = strategy().build_command(&instruction, Some("m")).unwrap();
        let second = strategy().build_command(&instruction, Some("m")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_context_files_are_trimmed_to_soft_limit() {
        let paths: Vec<String> = (0..30).map(|i| format!("src/f{i}.rs")).collect();
        let spec = strategy()
            .build_command(&instruction_with_context(paths), None)
            .unwrap();
        let count = spec.argv.iter().filter(|a| *a == "--file").count();
        assert_eq!(count, AIDER_CAPABILITIES.context_file_soft_limit);
    }

    #[test]
    fn test_success_transcript_parses_as_success() {
        let instruction = instruction_with_context(vec![]);
        strategy().build_command(&instruction, None).unwrap();
        let stdout = "Aider v0.86.0\nApplied edit to src/cli.rs\nTokens: 3.2k sent, 210 received.";
        let result = strategy().parse_output(stdout, "", 0);
        assert!(result.success);
        assert!(!result.summary.is_empty());
        assert_eq!(result.touched_files, vec!["src/cli.rs"]);
    }

    #[test]
    fn test_edit_report_vocabulary_is_not_a_failure() {
        for stdout in [
            "Applied edit to src/rate_limit.rs\nTokens: 1.1k sent, 90 received.",
            "Added a configurable request timeout to the client.\nApplied edit to src/http.rs",
            "Implemented overloaded operators.\nApplied edit to src/vec.rs",
        ] {
            let result = strategy().parse_output(stdout, "", 0);
            assert!(result.success, "{stdout}: {}", result.summary);
            assert!(!result.retryable, "{stdout}");
        }
    }

    #[test]
    fn test_silent_failures_downgrade_success() {
        for text in [
            "Summarization failed for model openrouter/x",
            "RuntimeError: Event loop is closed",
            "Model openrouter/x has hit a token limit!",
        ] {
            let result = strategy().parse_output(text, "", 0);
            assert!(!result.success, "{text}");
            assert!(!result.retryable, "{text}");
            assert!(result.notes.chars().count() <= 200);
        }
    }

    #[test]
    fn test_should_retry_follows_classification() {
        let strategy = strategy();
        assert!(strategy.should_retry("", "litellm.RateLimitError", 1));
        assert!(strategy.should_retry("", "litellm.APIConnectionError: Connection refused", 1));
        assert!(!strategy.should_retry("", "litellm.AuthenticationError", 1));
        assert!(!strategy.should_retry("", "litellm.NotFoundError: model", 1));
        assert!(!strategy.should_retry("Applied edit to a.rs", "", 0));
    }

    #[test]
    fn test_timeouts_per_task_type() {
        let strategy = strategy();
        assert_eq!(strategy.get_timeout(TaskType::Quick), Duration::from_secs(300));
        assert_eq!(
            strategy.get_timeout(TaskType::Sequential),
            Duration::from_secs(600)
        );
        assert_eq!(
            strategy.get_timeout(TaskType::Parallel),
            Duration::from_secs(1200)
        );
    }
}
