use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

pub const CONFIG_DIR: &str = ".agent-dispatch";
pub const CONFIG_FILE: &str = "config.toml";

const ENV_BACKEND: &str = "AGENT_DISPATCH_BACKEND";
const ENV_API_BASE: &str = "AGENT_DISPATCH_API_BASE";
const ENV_API_KEY: &str = "AGENT_DISPATCH_API_KEY";
const ENV_MODEL: &str = "AGENT_DISPATCH_MODEL";
const ENV_PROVIDER_ORDER: &str = "AGENT_DISPATCH_PROVIDER_ORDER";
const ENV_AIDER_BIN: &str = "AGENT_DISPATCH_AIDER_BIN";
const ENV_OPENCODE_BIN: &str = "AGENT_DISPATCH_OPENCODE_BIN";
const ENV_AIDER_TIMEOUT: &str = "AGENT_DISPATCH_AIDER_TIMEOUT_SECS";
const ENV_OPENCODE_TIMEOUT: &str = "AGENT_DISPATCH_OPENCODE_TIMEOUT_SECS";
const ENV_INACTIVITY_TIMEOUT: &str = "AGENT_DISPATCH_INACTIVITY_TIMEOUT_SECS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub default_backend: String,
    pub runner: RunnerConfig,
    pub orchestrator: OrchestratorConfig,
    pub rate_limit: RateLimitConfig,
    pub backends: BackendsConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_backend: "aider".to_string(),
            runner: RunnerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            backends: BackendsConfig::default(),
            logging: LoggingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn path_for(repo_root: &Path) -> PathBuf {
        repo_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load `<repo>/.agent-dispatch/config.toml` (defaults when absent),
    /// overlay the process environment, then validate.
    pub async fn load(repo_root: &Path) -> Result<Self> {
        Self::load_from(&Self::path_for(repo_root)).await
    }

    pub async fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "Loading configuration");
            let content = fs::read_to_string(config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config_path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content).await?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay environment variables. Shared endpoint, key, model and provider
    /// order apply to every backend; binaries and timeouts are per backend.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(backend) = get(ENV_BACKEND) {
            self.default_backend = backend.trim().to_lowercase();
        }

        for settings in [&mut self.backends.aider, &mut self.backends.opencode] {
            if let Some(base) = get(ENV_API_BASE) {
                settings.api_base = Some(base);
            }
            if let Some(key) = get(ENV_API_KEY) {
                settings.api_key = Some(key);
            }
            if let Some(model) = get(ENV_MODEL) {
                settings.model = Some(model);
            }
            if let Some(order) = get(ENV_PROVIDER_ORDER) {
                settings.provider_order = order
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
            }
        }

        if let Some(bin) = get(ENV_AIDER_BIN) {
            self.backends.aider.binary = bin;
        }
        if let Some(bin) = get(ENV_OPENCODE_BIN) {
            self.backends.opencode.binary = bin;
        }
        let seconds = |key: &str| get(key).and_then(|v| parse_secs(key, &v));
        if let Some(secs) = seconds(ENV_AIDER_TIMEOUT) {
            self.backends.aider.sequential_timeout_secs = secs;
        }
        if let Some(secs) = seconds(ENV_OPENCODE_TIMEOUT) {
            self.backends.opencode.sequential_timeout_secs = secs;
        }
        if let Some(secs) = seconds(ENV_INACTIVITY_TIMEOUT) {
            self.runner.inactivity_timeout_secs = secs;
        }
    }

    pub fn backend(&self, name: &str) -> Option<&BackendSettings> {
        match name {
            "aider" => Some(&self.backends.aider),
            "opencode" => Some(&self.backends.opencode),
            _ => None,
        }
    }

    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for settings in [&mut copy.backends.aider, &mut copy.backends.opencode] {
            if settings.api_key.is_some() {
                settings.api_key = Some("***".to_string());
            }
        }
        copy
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.runner.inactivity_timeout_secs == 0 {
            errors.push("runner.inactivity_timeout_secs must be greater than 0".into());
        }

        let orch = &self.orchestrator;
        if orch.default_fanout == 0 {
            errors.push("orchestrator.default_fanout must be greater than 0".into());
        }
        if orch.max_fanout < orch.default_fanout {
            errors.push("orchestrator.max_fanout must be >= default_fanout".into());
        }
        if orch.parallel_per_task_secs == 0 {
            errors.push("orchestrator.parallel_per_task_secs must be greater than 0".into());
        }

        for (name, settings) in [
            ("aider", &self.backends.aider),
            ("opencode", &self.backends.opencode),
        ] {
            if settings.binary.trim().is_empty() {
                errors.push(format!("backends.{name}.binary must not be empty"));
            }
            if settings.quick_timeout_secs == 0 || settings.sequential_timeout_secs == 0 {
                errors.push(format!("backends.{name} timeouts must be greater than 0"));
            }
            if settings.parallel_multiplier < 1.0 {
                errors.push(format!("backends.{name}.parallel_multiplier must be >= 1.0"));
            }
            // Keeps a parallel estimate below the sequential one for any step count.
            let sequential = orch
                .sequential_step_timeout_secs
                .unwrap_or(settings.sequential_timeout_secs);
            if orch.parallel_base_timeout_secs + orch.parallel_per_task_secs >= sequential {
                errors.push(format!(
                    "orchestrator.parallel_base_timeout_secs + parallel_per_task_secs must be \
                     less than the sequential step timeout of {name} ({sequential}s)"
                ));
            }
        }

        let rl = &self.rate_limit;
        for (op, limit) in std::iter::once(("default", &rl.default_limit))
            .chain(rl.operations.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if limit.max_calls == 0 {
                errors.push(format!("rate_limit {op}: max_calls must be greater than 0"));
            }
            if limit.time_window_secs <= 0.0 {
                errors.push(format!("rate_limit {op}: time_window_secs must be positive"));
            }
        }
        if rl.retry.multiplier < 1.0 {
            errors.push("rate_limit.retry.multiplier must be >= 1.0".into());
        }
        if rl.retry.initial_backoff_ms > rl.retry.max_backoff_ms {
            errors.push("rate_limit.retry.initial_backoff_ms must be <= max_backoff_ms".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Silence on both streams longer than this kills the process.
    pub inactivity_timeout_secs: u64,
    /// Pause between SIGKILL and reaping, to let the kernel release pipes.
    pub kill_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 20,
            kill_grace_ms: 100,
        }
    }
}

impl RunnerConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Overrides the backend's sequential timeout for steps without a time budget.
    pub sequential_step_timeout_secs: Option<u64>,
    pub parallel_base_timeout_secs: u64,
    pub parallel_per_task_secs: u64,
    pub default_fanout: usize,
    pub max_fanout: usize,
    /// Keep raw stdout/stderr on recorded results.
    pub keep_raw_output: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sequential_step_timeout_secs: None,
            parallel_base_timeout_secs: 120,
            parallel_per_task_secs: 300,
            default_fanout: 3,
            max_fanout: 8,
            keep_raw_output: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_limit: OperationLimit,
    pub operations: HashMap<String, OperationLimit>,
    /// Upper bound on a single token-bucket wait.
    pub max_wait_secs: u64,
    pub retry: RetryConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: OperationLimit::default(),
            operations: HashMap::new(),
            max_wait_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, operation: &str) -> OperationLimit {
        self.operations
            .get(operation)
            .copied()
            .unwrap_or(self.default_limit)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationLimit {
    pub max_calls: u32,
    pub time_window_secs: f64,
}

impl Default for OperationLimit {
    fn default() -> Self {
        Self {
            max_calls: 10,
            time_window_secs: 60.0,
        }
    }
}

impl OperationLimit {
    pub fn new(max_calls: u32, time_window_secs: f64) -> Self {
        Self {
            max_calls,
            time_window_secs,
        }
    }

    /// Tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.max_calls as f64 / self.time_window_secs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// `initial × multiplier^attempt`, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    pub binary: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub quick_timeout_secs: u64,
    pub sequential_timeout_secs: u64,
    pub parallel_multiplier: f64,
    #[serde(default)]
    pub provider_order: Vec<String>,
}

impl BackendSettings {
    pub fn aider() -> Self {
        Self {
            binary: "aider".to_string(),
            api_base: None,
            api_key: None,
            model: None,
            quick_timeout_secs: 300,
            sequential_timeout_secs: 600,
            parallel_multiplier: 2.0,
            provider_order: Vec::new(),
        }
    }

    pub fn opencode() -> Self {
        Self {
            binary: "opencode".to_string(),
            api_base: None,
            api_key: None,
            model: None,
            quick_timeout_secs: 300,
            sequential_timeout_secs: 900,
            parallel_multiplier: 2.0,
            provider_order: Vec::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn uses_openrouter(&self) -> bool {
        self.api_base
            .as_deref()
            .is_none_or(|base| base.contains("openrouter.ai"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    #[serde(deserialize_with = "aider_settings")]
    pub aider: BackendSettings,
    #[serde(deserialize_with = "opencode_settings")]
    pub opencode: BackendSettings,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            aider: BackendSettings::aider(),
            opencode: BackendSettings::opencode(),
        }
    }
}

/// A backend table as written in the file; unset keys keep that backend's defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendPatch {
    binary: Option<String>,
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    quick_timeout_secs: Option<u64>,
    sequential_timeout_secs: Option<u64>,
    parallel_multiplier: Option<f64>,
    provider_order: Option<Vec<String>>,
}

impl BackendPatch {
    fn apply(self, mut base: BackendSettings) -> BackendSettings {
        if let Some(binary) = self.binary {
            base.binary = binary;
        }
        base.api_base = self.api_base.or(base.api_base);
        base.api_key = self.api_key.or(base.api_key);
        base.model = self.model.or(base.model);
        if let Some(secs) = self.quick_timeout_secs {
            base.quick_timeout_secs = secs;
        }
        if let Some(secs) = self.sequential_timeout_secs {
            base.sequential_timeout_secs = secs;
        }
        if let Some(multiplier) = self.parallel_multiplier {
            base.parallel_multiplier = multiplier;
        }
        if let Some(order) = self.provider_order {
            base.provider_order = order;
        }
        base
    }
}

fn aider_settings<'de, D>(deserializer: D) -> std::result::Result<BackendSettings, D::Error>
where
    D: Deserializer<'de>,
{
    BackendPatch::deserialize(deserializer).map(|patch| patch.apply(BackendSettings::aider()))
}

fn opencode_settings<'de, D>(deserializer: D) -> std::result::Result<BackendSettings, D::Error>
where
    D: Deserializer<'de>,
{
    BackendPatch::deserialize(deserializer).map(|patch| patch.apply(BackendSettings::opencode()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Relative paths resolve against the repository root.
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(CONFIG_DIR).join("logs"),
        }
    }
}

impl LoggingConfig {
    pub fn resolve_dir(&self, repo_root: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            repo_root.join(&self.dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub binary_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            binary_ttl_secs: 300,
        }
    }
}

/// Parse a seconds override, warning and returning `None` when it is not a whole number.
fn parse_secs(variable: &str, value: &str) -> Option<u64> {
    match value.trim().parse() {
        Ok(secs) => Some(secs),
        Err(e) => {
            warn!(variable, value, error = %e, "Ignoring unparsable timeout override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        DispatchConfig::default().validate().unwrap();
    }

    #[test]
    fn test_env_overlay() {
        let mut config = DispatchConfig::default();
        config.apply_env_from(env(&[
            (ENV_BACKEND, "OpenCode"),
            (ENV_API_KEY, "sk-test"),
            (ENV_MODEL, "qwen/qwen3-coder"),
            (ENV_PROVIDER_ORDER, "cerebras, groq,,"),
            (ENV_AIDER_BIN, "/opt/aider/bin/aider"),
            (ENV_AIDER_TIMEOUT, "1200"),
            (ENV_INACTIVITY_TIMEOUT, "45"),
        ]));

        assert_eq!(config.default_backend, "opencode");
        assert_eq!(config.backends.aider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.backends.opencode.api_key.as_deref(), Some("sk-test"));
        assert_eq!(
            config.backends.opencode.provider_order,
            vec!["cerebras", "groq"]
        );
        assert_eq!(config.backends.aider.binary, "/opt/aider/bin/aider");
        assert_eq!(config.backends.aider.sequential_timeout_secs, 1200);
        assert_eq!(config.backends.opencode.sequential_timeout_secs, 900);
        assert_eq!(config.runner.inactivity_timeout_secs, 45);
    }

    #[test]
    fn test_env_overlay_ignores_blank_and_unparsable() {
        let mut config = DispatchConfig::default();
        config.apply_env_from(env(&[(ENV_API_KEY, "  "), (ENV_AIDER_TIMEOUT, "soon")]));
        assert!(config.backends.aider.api_key.is_none());
        assert_eq!(config.backends.aider.sequential_timeout_secs, 600);
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs(ENV_AIDER_TIMEOUT, " 45 "), Some(45));
        assert_eq!(parse_secs(ENV_AIDER_TIMEOUT, "soon"), None);
        assert_eq!(parse_secs(ENV_INACTIVITY_TIMEOUT, "-5"), None);
        assert_eq!(parse_secs(ENV_INACTIVITY_TIMEOUT, "1.5"), None);
    }

    #[test]
    fn test_validate_rejects_parallel_budget_above_sequential() {
        let mut config = DispatchConfig::default();
        config.orchestrator.parallel_base_timeout_secs = 500;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("parallel_base_timeout_secs"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = DispatchConfig::default();
        config.runner.inactivity_timeout_secs = 0;
        config.rate_limit.default_limit.max_calls = 0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("inactivity_timeout_secs"));
        assert!(msg.contains("max_calls"));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 500,
        };
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(400));
        assert_eq!(retry.backoff(3), Duration::from_millis(500));
    }

    #[test]
    fn test_redacted_masks_keys() {
        let mut config = DispatchConfig::default();
        config.backends.aider.api_key = Some("sk-secret".into());
        let shown = toml::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = DispatchConfig::path_for(dir.path());

        let mut config = DispatchConfig::default();
        config.orchestrator.default_fanout = 4;
        config
            .rate_limit
            .operations
            .insert("execute_step".into(), OperationLimit::new(2, 10.0));
        config.save(&path).await.unwrap();

        let loaded = DispatchConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded.orchestrator.default_fanout, 4);
        assert_eq!(
            loaded.rate_limit.limit_for("execute_step"),
            OperationLimit::new(2, 10.0)
        );
    }
}
