use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::SignatureTable;
use crate::execution::ExecutionResult;
use crate::utils::tail_chars;

const NOTES_MAX_CHARS: usize = 200;

static FILE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)\b(?:wrote|created|modified|updated|edited)\s+[`'"]?([^\s`'"]+)"#,
        r#"(?i)\bapplied edit to\s+[`'"]?([^\s`'"]+)"#,
        r#"(?i)\bfile:\s*[`'"]?([^\s`'"]+)"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Paths reported by phrases like "wrote src/a.rs" or "file: b.py", in order of
/// first appearance, without duplicates.
pub fn extract_touched_files(output: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = FILE_PATTERNS
        .iter()
        .flat_map(|re| re.captures_iter(output))
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| clean_path(m.as_str()).map(|p| (m.start(), p)))
        .collect();
    hits.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    hits.into_iter()
        .map(|(_, path)| path)
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

fn clean_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(['.', ',', ':', ';', ')', ']', '!']);
    let looks_like_path = trimmed.contains('/')
        || trimmed
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty());
    if trimmed.is_empty() || !looks_like_path || trimmed.contains("://") {
        return None;
    }
    Some(trimmed.to_string())
}

/// Shared output classification: signature table first (so exit code 0 can be
/// downgraded), then exit status, then success with extracted paths.
pub fn classify_output(
    backend: &str,
    table: &SignatureTable,
    stdout: &str,
    stderr: &str,
    exit_code: i32,
) -> ExecutionResult {
    let combined = format!("{stdout}\n{stderr}");

    if let Some(hit) = table.classify(&combined) {
        debug!(
            backend,
            exit_code,
            category = ?hit.category,
            retryable = hit.retryable,
            "Failure signature detected"
        );
        return ExecutionResult::failure(
            "",
            format!("{backend} failed: {}", hit.category.describe()),
            hit.excerpt,
            exit_code,
        )
        .with_retryable(hit.retryable);
    }

    if exit_code != 0 {
        let source = if stderr.trim().is_empty() { stdout } else { stderr };
        return ExecutionResult::failure(
            "",
            format!("{backend} exited with code {exit_code}"),
            tail_chars(source, NOTES_MAX_CHARS),
            exit_code,
        );
    }

    let touched = extract_touched_files(&combined);
    let summary = match touched.len() {
        0 => format!("{backend} completed; no file changes reported"),
        1 => format!("{backend} completed; 1 file touched"),
        n => format!("{backend} completed; {n} files touched"),
    };
    ExecutionResult::success("", summary, touched, exit_code)
}
