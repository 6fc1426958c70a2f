use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

const REDACTED: &str = "***";

/// Flags whose following argument is a credential.
const SECRET_FLAGS: &[&str] = &[
    "--api-key",
    "--openai-api-key",
    "--anthropic-api-key",
    "--token",
];

/// A backend-native invocation produced by a strategy.
///
/// `env` holds only the overrides; the child inherits the rest of the
/// current process environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            env: BTreeMap::new(),
            working_dir: working_dir.into(),
            metadata: BTreeMap::new(),
            secrets: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Register a value that must never appear in logs.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn model(&self) -> &str {
        self.metadata.get("model").map(String::as_str).unwrap_or_default()
    }

    pub fn backend(&self) -> &str {
        self.metadata
            .get("backend")
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn mask(&self, value: &str) -> String {
        self.secrets
            .iter()
            .fold(value.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }

    /// argv safe for logs: credential flag values and registered secrets masked.
    pub fn redacted_argv(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.argv.len());
        let mut mask_next = false;
        for arg in &self.argv {
            if mask_next {
                out.push(match arg.split_once('=') {
                    Some((provider, _)) => format!("{provider}={REDACTED}"),
                    None => REDACTED.to_string(),
                });
                mask_next = false;
                continue;
            }
            let inline_flag = arg
                .split_once('=')
                .map(|(flag, _)| flag)
                .filter(|flag| SECRET_FLAGS.contains(flag));
            if let Some(flag) = inline_flag {
                out.push(format!("{flag}={REDACTED}"));
                continue;
            }
            mask_next = SECRET_FLAGS.contains(&arg.as_str());
            out.push(self.mask(arg));
        }
        out
    }

    /// Environment overrides safe for logs.
    pub fn redacted_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(key, value)| {
                let upper = key.to_uppercase();
                let sensitive = ["KEY", "TOKEN", "SECRET", "PASSWORD"]
                    .iter()
                    .any(|marker| upper.contains(marker));
                let shown = if sensitive {
                    REDACTED.to_string()
                } else {
                    self.mask(value)
                };
                (key.clone(), shown)
            })
            .collect()
    }
}
