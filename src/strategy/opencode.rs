use std::sync::LazyLock;
use std::time::Duration;

use tracing::debug;

use super::signatures::rule;
use super::{
    COMMON_RULES, Capabilities, CliStrategy, CommandSpec, SignatureCategory, SignatureRule,
    SignatureTable, TaskType, classify_output,
};
use crate::config::BackendSettings;
use crate::error::{DispatchError, Result};
use crate::execution::ExecutionResult;
use crate::instruction::Instruction;

pub const DEFAULT_OPENCODE_MODEL: &str = "qwen/qwen3-coder";

pub const OPENCODE_CAPABILITIES: Capabilities = Capabilities {
    streaming: true,
    file_context: false,
    model_routing: true,
    native_endpoint: true,
    sessions: true,
    preferred_task_types: &[TaskType::Parallel, TaskType::Sequential],
    context_file_soft_limit: 50,
};

const OPENCODE_RULES: &[SignatureRule] = &[
    rule(
        r"providermodelnotfounderror|model not found",
        SignatureCategory::InvalidModel,
        false,
    ),
    rule(
        r"providerautherror|no credentials found",
        SignatureCategory::InvalidCredentials,
        false,
    ),
];

static OPENCODE_TABLE: LazyLock<SignatureTable> =
    LazyLock::new(|| SignatureTable::compile(&[OPENCODE_RULES, COMMON_RULES]));

pub struct OpenCodeStrategy {
    settings: BackendSettings,
}

impl OpenCodeStrategy {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }

    fn routed_model(&self, model_override: Option<&str>) -> String {
        let model = model_override
            .or(self.settings.model.as_deref())
            .unwrap_or(DEFAULT_OPENCODE_MODEL);
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

impl CliStrategy for OpenCodeStrategy {
    fn name(&self) -> &str {
        "opencode"
    }

    fn capabilities(&self) -> &Capabilities {
        &OPENCODE_CAPABILITIES
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
                backend: "opencode".into(),
                variable: "AGENT_DISPATCH_API_KEY".into(),
            })?;

        let routed = self.routed_model(model_override);

        // opencode has no per-file flag; context paths travel inside the prompt.
        let argv = vec![
            self.settings.binary.clone(),
            "run".to_string(),
            "--model".to_string(),
            routed.clone(),
            instruction.to_prompt(),
        ];

        let mut spec = CommandSpec::new(argv, &instruction.repo_root)
            .with_env("NO_COLOR", "1")
            .with_env("TERM", "dumb")
            .with_secret(api_key)
            .with_metadata("backend", "opencode")
            .with_metadata("model", routed.clone())
            .with_metadata("instruction", instruction.label());

        if self.settings.uses_openrouter() {
            spec = spec.with_env("OPENROUTER_API_KEY", api_key);
            if !self.settings.provider_order.is_empty() {
                let order = self.settings.provider_order.join(",");
                spec = spec
                    .with_env("OPENROUTER_PROVIDER_ORDER", order.clone())
                    .with_metadata("provider_order", order);
            }
        } else {
            spec = spec.with_env("OPENAI_API_KEY", api_key);
            if let Some(base) = &self.settings.api_base {
                spec = spec.with_env("OPENAI_BASE_URL", base.clone());
            }
        }

        debug!(model = %routed, "Built opencode command");
        Ok(spec)
    }

    fn parse_output(&self, stdout: &str, stderr: &str, exit_code: i32) -> ExecutionResult {
        classify_output("opencode", &OPENCODE_TABLE, stdout, stderr, exit_code)
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
