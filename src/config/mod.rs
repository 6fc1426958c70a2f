//! Configuration types and loading.
//!
//! - `DispatchConfig`: top-level configuration, TOML file plus environment overlay
//! - `BackendSettings`: per-backend binary, endpoint, credentials and timeouts
//! - `RunnerConfig`, `OrchestratorConfig`, `RateLimitConfig`: engine tuning

mod settings;

pub use settings::{
    BackendSettings, BackendsConfig, CONFIG_DIR, CONFIG_FILE, CacheConfig, DispatchConfig,
    LoggingConfig, OperationLimit, OrchestratorConfig, RateLimitConfig, RetryConfig,
    RunnerConfig,
};
