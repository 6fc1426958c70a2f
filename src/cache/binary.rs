use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::TtlCache;
use crate::config::CacheConfig;
use crate::error::{DispatchError, Result};

/// Resolves backend executables through `PATH`, remembering hits for a while.
#[derive(Debug)]
pub struct BinaryResolver {
    cache: TtlCache<String, PathBuf>,
    search_path: Option<OsString>,
}

impl BinaryResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            search_path: None,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.binary_ttl_secs))
    }

    /// Search this list instead of the process `PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn resolve(&self, backend: &str, binary: &str) -> Result<PathBuf> {
        let not_found = || DispatchError::BinaryNotFound {
            backend: backend.to_string(),
            binary: binary.to_string(),
        };

        if binary.trim().is_empty() {
            return Err(not_found());
        }

        let candidate = Path::new(binary);
        if candidate.components().count() > 1 {
            return if is_executable(candidate) {
                Ok(candidate.to_path_buf())
            } else {
                Err(not_found())
            };
        }

        if let Some(hit) = self.cache.get(&binary.to_string()) {
            return Ok(hit);
        }

        let search = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .ok_or_else(not_found)?;
        let resolved = std::env::split_paths(&search)
            .map(|dir| dir.join(binary))
            .find(|path| is_executable(path))
            .ok_or_else(not_found)?;

        debug!(backend, binary, path = %resolved.display(), "Resolved backend binary");
        self.cache.insert(binary.to_string(), resolved.clone());
        Ok(resolved)
    }

    pub fn invalidate(&self, binary: &str) {
        self.cache.invalidate(&binary.to_string());
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
