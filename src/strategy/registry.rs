use std::sync::Arc;

use tracing::debug;

use super::{AiderStrategy, Capabilities, CliStrategy, OpenCodeStrategy, TaskType};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};

pub type StrategyFactory = fn(&DispatchConfig) -> Arc<dyn CliStrategy>;

struct Entry {
    name: &'static str,
    capabilities: Capabilities,
    factory: StrategyFactory,
}

/// Name-keyed catalogue of backends. Registration order is preserved and
/// breaks ties in `select_for`.
pub struct StrategyRegistry {
    entries: Vec<Entry>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("aider", super::AIDER_CAPABILITIES, |config| {
            Arc::new(AiderStrategy::new(config.backends.aider.clone()))
        });
        registry.register("opencode", super::OPENCODE_CAPABILITIES, |config| {
            Arc::new(OpenCodeStrategy::new(config.backends.opencode.clone()))
        });
        registry
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a backend, replacing any previous entry with the same name.
    pub fn register(
        &mut self,
        name: &'static str,
        capabilities: Capabilities,
        factory: StrategyFactory,
    ) {
        let entry = Entry {
            name,
            capabilities,
            factory,
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn create(&self, name: &str, config: &DispatchConfig) -> Result<Arc<dyn CliStrategy>> {
        let wanted = name.trim().to_lowercase();
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == wanted)
            .ok_or_else(|| DispatchError::UnknownBackend(name.to_string()))?;
        debug!(backend = entry.name, "Creating strategy");
        Ok((entry.factory)(config))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub fn capabilities(&self, name: &str) -> Option<&Capabilities> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.capabilities)
    }

    /// First registered backend that lists `task_type` as preferred, falling
    /// back to the first registered one.
    pub fn select_for(&self, task_type: TaskType) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|e| e.capabilities.prefers(task_type))
            .or_else(|| self.entries.first())
            .map(|e| e.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = StrategyRegistry::new();
        assert_eq!(registry.names(), vec!["aider", "opencode"]);
        assert!(registry.capabilities("aider").unwrap().file_context);
        assert!(registry.capabilities("codex").is_none());
    }

    #[test]
    fn test_create_is_case_insensitive() {
        let registry = StrategyRegistry::new();
        let config = DispatchConfig::default();
        assert_eq!(registry.create("OpenCode", &config).unwrap().name(), "opencode");
        assert_eq!(registry.create(" aider ", &config).unwrap().name(), "aider");
    }

    #[test]
    fn test_unknown_backend() {
        let registry = StrategyRegistry::new();
        let err = registry
            .create("codex", &DispatchConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::UnknownBackend(ref n) if n == "codex"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_select_for_task_type() {
        let registry = StrategyRegistry::new();
        assert_eq!(registry.select_for(TaskType::Quick), Some("aider"));
        assert_eq!(registry.select_for(TaskType::Parallel), Some("opencode"));
        assert_eq!(StrategyRegistry::empty().select_for(TaskType::Quick), None);
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = StrategyRegistry::new();
        registry.register("aider", super::super::OPENCODE_CAPABILITIES, |config| {
            Arc::new(OpenCodeStrategy::new(config.backends.opencode.clone()))
        });
        assert_eq!(registry.names().len(), 2);
        assert_eq!(
            registry
                .create("aider", &DispatchConfig::default())
                .unwrap()
                .name(),
            "opencode"
        );
    }
}
