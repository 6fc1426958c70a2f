use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{FileScope, ParallelPlanRequest, PlanStep, SequentialPlanRequest};
use crate::error::Result;
use crate::instruction::Mode;

/// A plan as written to disk: JSON, or TOML when the file ends in `.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub file_scope: FileScope,
    #[serde(default)]
    pub fanout: Option<usize>,
    pub steps: Vec<PlanStep>,
}

impl PlanDocument {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Ok(toml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    pub fn into_sequential(
        self,
        repo_root: impl Into<PathBuf>,
        model: Option<String>,
    ) -> SequentialPlanRequest {
        SequentialPlanRequest {
            plan_id: self.plan_id,
            repo_root: repo_root.into(),
            steps: self.steps,
            file_scope: self.file_scope,
            mode: Mode::Full,
            model,
        }
    }

    /// `fanout` overrides the document's own value.
    pub fn into_parallel(
        self,
        repo_root: impl Into<PathBuf>,
        model: Option<String>,
        fanout: Option<usize>,
    ) -> ParallelPlanRequest {
        ParallelPlanRequest {
            plan_id: self.plan_id,
            repo_root: repo_root.into(),
            steps: self.steps,
            file_scope: self.file_scope,
            fanout: fanout.or(self.fanout),
            model,
            timeout_secs: None,
        }
    }
}
