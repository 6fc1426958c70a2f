use std::collections::BTreeMap;

use glob::{MatchOptions, Pattern};

use crate::plan::{FileScope, MergeReport, ScopeOverlap};

pub const ISOLATION_STRATEGY: &str = "scope_isolation";
pub const ENFORCEMENT_ADVISORY: &str = "advisory";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn has_wildcard(glob: &str) -> bool {
    glob.contains(['*', '?', '['])
}

/// Whether `path` falls under `glob`. Unparseable globs only match themselves.
pub fn glob_matches(glob: &str, path: &str) -> bool {
    let path = path.trim_start_matches("./");
    let glob = glob.trim_start_matches("./");
    match Pattern::new(glob) {
        Ok(pattern) => pattern.matches_with(path, MATCH_OPTIONS),
        Err(_) => glob == path,
    }
}

/// Directory part of a glob before its first wildcard.
fn literal_dir_prefix(glob: &str) -> &str {
    let wildcard = glob.find(['*', '?', '[']).unwrap_or(glob.len());
    match glob[..wildcard].rfind('/') {
        Some(slash) => &glob[..=slash],
        None => "",
    }
}

/// Conservative test for two globs possibly naming the same file.
fn globs_may_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (has_wildcard(a), has_wildcard(b)) {
        (false, false) => false,
        (false, true) => glob_matches(b, a),
        (true, false) => glob_matches(a, b),
        (true, true) => {
            let (pa, pb) = (literal_dir_prefix(a), literal_dir_prefix(b));
            pa.starts_with(pb) || pb.starts_with(pa)
        }
    }
}

fn overlap_reason(first: &(String, FileScope), second: &(String, FileScope)) -> Option<String> {
    let (a_id, a) = first;
    let (b_id, b) = second;

    if a.allowed_globs.is_empty() || b.allowed_globs.is_empty() {
        let open = if a.allowed_globs.is_empty() { a_id } else { b_id };
        return Some(format!("task {open} has no allowed paths"));
    }

    for ga in &a.allowed_globs {
        for gb in &b.allowed_globs {
            if ga == gb {
                return Some(format!("both allow {ga}"));
            }
            if globs_may_overlap(ga, gb) {
                return Some(format!("{ga} ({a_id}) overlaps {gb} ({b_id})"));
            }
        }
    }

    let context_hit = |ctx: &FileScope, ctx_id: &str, other: &FileScope, other_id: &str| {
        ctx.context_paths.iter().find_map(|path| {
            other
                .allowed_globs
                .iter()
                .find(|g| glob_matches(g, path))
                .map(|g| format!("context {path} of {ctx_id} is writable by {other_id} via {g}"))
        })
    };
    context_hit(a, a_id.as_str(), b, b_id.as_str())
        .or_else(|| context_hit(b, b_id.as_str(), a, a_id.as_str()))
}

/// Describe how the per-task scopes of a parallel plan relate.
///
/// Scopes are handed to the backend as instructions; nothing here enforces
/// them, which is what `enforcement = "advisory"` records.
pub fn merge_report(tasks: &[(String, FileScope)]) -> MergeReport {
    let mut overlaps = Vec::new();
    for (i, first) in tasks.iter().enumerate() {
        for second in &tasks[i + 1..] {
            if let Some(reason) = overlap_reason(first, second) {
                overlaps.push(ScopeOverlap {
                    first: first.0.clone(),
                    second: second.0.clone(),
                    reason,
                });
            }
        }
    }

    MergeReport {
        strategy: ISOLATION_STRATEGY.to_string(),
        enforcement: ENFORCEMENT_ADVISORY.to_string(),
        disjoint: overlaps.is_empty(),
        overlaps,
        task_scopes: tasks
            .iter()
            .map(|(id, scope)| (id.clone(), scope.allowed_globs.clone()))
            .collect(),
    }
}

/// Map each task id to the modified files its allowed globs cover.
pub fn attribute_files(
    files: &[String],
    tasks: &[(String, FileScope)],
) -> BTreeMap<String, Vec<String>> {
    tasks
        .iter()
        .map(|(id, scope)| {
            let owned = files
                .iter()
                .filter(|file| scope.allowed_globs.iter().any(|g| glob_matches(g, file)))
                .cloned()
                .collect();
            (id.clone(), owned)
        })
        .collect()
}
