use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code reported when the runner itself failed (spawn failure or timeout kill),
/// as opposed to the backend reporting a nonzero status.
pub const RUNNER_EXIT_CODE: i32 = -1;

const DEFAULT_FAILURE_SUMMARY: &str = "Execution failed";
const DEFAULT_SUCCESS_SUMMARY: &str = "Execution completed";

/// Result of one subprocess invocation.
///
/// Always either a success carrying its touched paths or a failure carrying a
/// non-empty summary. Timeouts and crashes are failures, never "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default)]
    pub touched_files: Vec<String>,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub model: String,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn success(
        model: impl Into<String>,
        summary: impl Into<String>,
        touched_files: Vec<String>,
        exit_code: i32,
    ) -> Self {
        let summary = non_empty(summary.into(), DEFAULT_SUCCESS_SUMMARY);
        Self {
            success: true,
            summary,
            notes: String::new(),
            touched_files,
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            model: model.into(),
            retryable: false,
            elapsed_ms: 0,
        }
    }

    pub fn failure(
        model: impl Into<String>,
        summary: impl Into<String>,
        notes: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        let summary = non_empty(summary.into(), DEFAULT_FAILURE_SUMMARY);
        Self {
            success: false,
            summary,
            notes: notes.into(),
            touched_files: Vec::new(),
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            model: model.into(),
            retryable: false,
            elapsed_ms: 0,
        }
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Only failures can be retryable.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable && !self.success;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_touched_files(mut self, files: Vec<String>) -> Self {
        self.touched_files = files;
        self
    }

    pub fn is_runner_failure(&self) -> bool {
        self.exit_code == RUNNER_EXIT_CODE
    }

    /// Drop raw stream content, keeping the classification.
    pub fn without_output(mut self) -> Self {
        self.stdout.clear();
        self.stderr.clear();
        self
    }
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_summary_never_empty() {
        let result = ExecutionResult::failure("m", "  ", "", 2);
        assert!(!result.success);
        assert_eq!(result.summary, DEFAULT_FAILURE_SUMMARY);
    }

    #[test]
    fn test_success_cannot_be_retryable() {
        let result = ExecutionResult::success("m", "done", vec![], 0).with_retryable(true);
        assert!(!result.retryable);

        let failed = ExecutionResult::failure("m", "rate limited", "", 1).with_retryable(true);
        assert!(failed.retryable);
    }

    #[test]
    fn test_runner_failure_exit_code() {
        let result = ExecutionResult::failure("m", "timed out", "", RUNNER_EXIT_CODE);
        assert!(result.is_runner_failure());
        assert!(!ExecutionResult::failure("m", "bad", "", 1).is_runner_failure());
    }

    #[test]
    fn test_serialization_skips_empty_streams() {
        let result = ExecutionResult::success("m", "ok", vec!["a.rs".into()], 0);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("stdout").is_none());
        assert_eq!(json["touched_files"][0], "a.rs");
    }
}
