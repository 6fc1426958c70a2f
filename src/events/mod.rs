//! Append-only JSON-lines record of dispatch lifecycle events.
//!
//! One file per session at `<log_dir>/<session_id>.jsonl`. Logging is best
//! effort: write failures are reported through `tracing` and otherwise ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::execution::ExecutionResult;
use crate::plan::PlanResult;
use crate::strategy::CommandSpec;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    PlanStarted {
        mode: String,
        backend: String,
        steps: usize,
    },
    CommandStarted {
        label: String,
        argv: Vec<String>,
        env: BTreeMap<String, String>,
        timeout_secs: u64,
    },
    ResultRecorded {
        label: String,
        success: bool,
        exit_code: i32,
        retryable: bool,
        model: String,
        summary: String,
        elapsed_ms: u64,
    },
    PlanFinished {
        status: String,
        succeeded: usize,
        failed: usize,
        touched_files: usize,
        elapsed_ms: u64,
    },
}

impl EventKind {
    /// Secrets are masked before anything reaches disk.
    pub fn command_started(label: &str, spec: &CommandSpec, timeout_secs: u64) -> Self {
        Self::CommandStarted {
            label: label.to_string(),
            argv: spec.redacted_argv(),
            env: spec.redacted_env(),
            timeout_secs,
        }
    }

    pub fn result_recorded(label: &str, result: &ExecutionResult) -> Self {
        Self::ResultRecorded {
            label: label.to_string(),
            success: result.success,
            exit_code: result.exit_code,
            retryable: result.retryable,
            model: result.model.clone(),
            summary: result.summary.clone(),
            elapsed_ms: result.elapsed_ms,
        }
    }

    pub fn plan_finished(result: &PlanResult) -> Self {
        Self::PlanFinished {
            status: result.status.as_str().to_string(),
            succeeded: result.succeeded(),
            failed: result.failed(),
            touched_files: result.touched_files.len(),
            elapsed_ms: result.elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    dir: PathBuf,
    session_id: String,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session_id: session_id.into(),
        }
    }

    /// A log under `dir` with a fresh random session id.
    pub fn with_new_session(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, Uuid::new_v4().to_string())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.jsonl", self.session_id))
    }

    pub async fn record(&self, plan_id: Option<&str>, kind: EventKind) {
        let record = EventRecord {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            plan_id: plan_id.map(str::to_string),
            kind,
        };
        let mut line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize event");
                return;
            }
        };
        line.push('\n');

        if let Err(e) = fs::create_dir_all(&self.dir).await {
            warn!(error = %e, dir = %self.dir.display(), "Failed to create event log directory");
            return;
        }

        let path = self.path();
        match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, path = %path.display(), "Failed to write event log");
                }
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to open event log");
            }
        }
    }

    /// Parse every line of a session file.
    pub async fn read_events(path: &Path) -> Result<Vec<serde_json::Value>> {
        let content = fs::read_to_string(path).await?;
        let mut events = Vec::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path().join("logs"), "session-1");

        log.record(
            Some("plan-a"),
            EventKind::PlanStarted {
                mode: "sequential".into(),
                backend: "aider".into(),
                steps: 2,
            },
        )
        .await;
        let result = ExecutionResult::failure("m", "aider exited with code 1", "", 1);
        log.record(Some("plan-a"), EventKind::result_recorded("s1", &result))
            .await;

        let events = EventLog::read_events(&log.path()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "plan_started");
        assert_eq!(events[0]["plan_id"], "plan-a");
        assert_eq!(events[0]["session_id"], "session-1");
        assert_eq!(events[1]["event"], "result_recorded");
        assert_eq!(events[1]["success"], false);
        assert_eq!(events[1]["exit_code"], 1);
    }

    #[tokio::test]
    async fn test_command_event_is_redacted() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::with_new_session(dir.path());
        let spec = CommandSpec::new(
            vec!["aider".into(), "--api-key".into(), "openrouter=sk-9".into()],
            "/repo",
        )
        .with_env("OPENROUTER_API_KEY", "sk-9")
        .with_secret("sk-9");

        log.record(None, EventKind::command_started("quick", &spec, 300))
            .await;

        let raw = fs::read_to_string(log.path()).await.unwrap();
        assert!(!raw.contains("sk-9"));
        assert!(raw.contains("openrouter=***"));
        assert!(!raw.contains("plan_id"));
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_ignored() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let log = EventLog::new(blocker.join("logs"), "s");
        log.record(
            None,
            EventKind::PlanStarted {
                mode: "quick".into(),
                backend: "aider".into(),
                steps: 1,
            },
        )
        .await;
        assert!(!log.path().exists());
    }
}
