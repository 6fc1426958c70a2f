use thiserror::Error;

use crate::execution::ExecutionResult;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{backend}: missing credential, set {variable}")]
    MissingCredential {
        backend: String,
        variable: String,
    },

    #[error("{backend}: binary '{binary}' not found on PATH")]
    BinaryNotFound { backend: String, binary: String },

    #[error("Unknown backend: {0} (available: aider, opencode)")]
    UnknownBackend(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Rate limit token unavailable for {operation} (client: {client_id})")]
    RateLimited {
        operation: String,
        client_id: String,
    },

    /// A completed invocation whose output was classified retryable.
    /// Raised inside retry loops only; the orchestrator unwraps it back into a result.
    #[error("Transient backend failure: {}", .0.summary)]
    TransientFailure(Box<ExecutionResult>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl DispatchError {
    /// Configuration errors are raised before spawning and are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::MissingCredential { .. }
                | Self::BinaryNotFound { .. }
                | Self::UnknownBackend(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFailure(_) | Self::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
