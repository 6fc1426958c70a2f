use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// How many opening braces before a `"steps_` key are tried as object starts.
const MAX_BRACE_CANDIDATES: usize = 16;

static JSON_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").ok());

/// Structured report a backend prints at the end of a parallel plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultBlock {
    pub status: String,
    pub steps_completed: Vec<String>,
    pub steps_failed: Vec<String>,
    pub summaries: BTreeMap<String, String>,
    pub files_modified: Vec<String>,
}

impl ResultBlock {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !obj.contains_key("steps_completed") && !obj.contains_key("steps_failed") {
            return None;
        }
        let summaries = obj
            .get("summaries")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(id, text)| (id.clone(), scalar_to_string(text)))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            status: obj
                .get("status")
                .map(scalar_to_string)
                .unwrap_or_default(),
            steps_completed: string_list(obj.get("steps_completed")),
            steps_failed: string_list(obj.get("steps_failed")),
            summaries,
            files_modified: string_list(obj.get("files_modified")),
        })
    }

    pub fn failed(&self, id: &str) -> bool {
        self.steps_failed.iter().any(|s| s == id)
    }

    pub fn completed(&self, id: &str) -> bool {
        self.steps_completed.iter().any(|s| s == id)
    }

    pub fn summary_for(&self, id: &str) -> Option<&str> {
        self.summaries
            .get(id)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(scalar_to_string)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Find the last structured result block in `output`.
///
/// Fenced code blocks are tried first, newest last; otherwise the bare object
/// around the last `"steps_completed"`/`"steps_failed"` key is extracted by
/// brace matching.
pub fn parse_result_block(output: &str) -> Option<ResultBlock> {
    if let Some(fence) = JSON_FENCE.as_ref() {
        let fenced: Vec<&str> = fence
            .captures_iter(output)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .collect();
        let hit = fenced.iter().rev().find_map(|body| {
            serde_json::from_str::<Value>(body.trim())
                .ok()
                .and_then(|v| ResultBlock::from_value(&v))
        });
        if hit.is_some() {
            return hit;
        }
    }

    let mut keys: Vec<usize> = output
        .match_indices("\"steps_completed\"")
        .chain(output.match_indices("\"steps_failed\""))
        .map(|(idx, _)| idx)
        .collect();
    keys.sort_unstable();

    keys.iter().rev().find_map(|&key| {
        output[..key]
            .match_indices('{')
            .map(|(idx, _)| idx)
            .rev()
            .take(MAX_BRACE_CANDIDATES)
            .find_map(|start| {
                let end = matching_brace(output, start)?;
                if end < key {
                    return None;
                }
                serde_json::from_str::<Value>(&output[start..=end])
                    .ok()
                    .and_then(|v| ResultBlock::from_value(&v))
            })
    })
}

/// Byte index of the `}` closing the object opened at `start`, skipping
/// braces inside JSON strings.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block() {
        let output = "Working on tasks...\nApplied edit to src/a.rs\n\
            ```json\n{\"status\": \"partial\", \"steps_completed\": [\"a\", \"b\"], \
            \"steps_failed\": [\"c\"], \"summaries\": {\"c\": \"tests failed\"}, \
            \"files_modified\": [\"src/a.rs\"]}\n```\n";
        let block = parse_result_block(output).unwrap();
        assert_eq!(block.status, "partial");
        assert_eq!(block.steps_completed, vec!["a", "b"]);
        assert!(block.failed("c"));
        assert_eq!(block.summary_for("c"), Some("tests failed"));
        assert_eq!(block.summary_for("a"), None);
        assert_eq!(block.files_modified, vec!["src/a.rs"]);
    }

    #[test]
    fn test_last_fenced_block_wins() {
        let output = "```json\n{\"status\": \"failed\", \"steps_completed\": []}\n```\n\
            retrying\n```json\n{\"status\": \"success\", \"steps_completed\": [\"x\"]}\n```";
        let block = parse_result_block(output).unwrap();
        assert_eq!(block.status, "success");
        assert!(block.completed("x"));
    }

    #[test]
    fn test_unrelated_fences_are_skipped() {
        let output = "```json\n{\"status\": \"success\", \"steps_completed\": [1, 2]}\n```\n\
            ```json\n{\"name\": \"package\"}\n```";
        let block = parse_result_block(output).unwrap();
        assert_eq!(block.steps_completed, vec!["1", "2"]);
    }

    #[test]
    fn test_bare_object_with_nested_braces() {
        let output = "fn main() { println!(\"{}\", 1); }\nDone: {\"status\": \"success\", \
            \"steps_completed\": [\"t1\"], \"summaries\": {\"t1\": \"added {braces}\"}} bye";
        let block = parse_result_block(output).unwrap();
        assert!(block.completed("t1"));
        assert_eq!(block.summary_for("t1"), Some("added {braces}"));
    }

    #[test]
    fn test_missing_block() {
        assert!(parse_result_block("All done, no JSON here").is_none());
        assert!(parse_result_block("{\"status\": \"success\"}").is_none());
        assert!(parse_result_block("{\"steps_completed\": [\"a\"").is_none());
    }

    #[test]
    fn test_matching_brace_skips_strings() {
        let text = r#"{"a": "}", "b": {"c": 1}} tail"#;
        assert_eq!(matching_brace(text, 0), Some(text.find(" tail").unwrap() - 1));
    }
}
