//! Response-parsing rules for the analyze phase's AI output.
//!
//! The backing model is asked for a JSON document embedded in prose; these
//! helpers implement the tolerant extraction and field-repair rules so a
//! slightly-off response still yields a usable `Component` update rather
//! than a failed unit.

use serde_json::Value;

use super::graph::CodeExample;

const DIAGRAM_KEYWORDS: &[&str] = &[
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "erDiagram",
    "journey",
    "gantt",
    "pie",
];

/// Extract a JSON document from a model response that may wrap it in prose
/// or a fenced code block. Tries, in order: the whole trimmed text as JSON,
/// a fenced code block's contents, then the first brace-balanced span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(fenced.trim()) {
            return Some(v);
        }
    }
    if let Some(span) = first_brace_balanced_span(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(span) {
            return Some(v);
        }
    }
    None
}

/// Contents of the first ``` fenced block, with an optional language tag on
/// the opening fence stripped.
fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// The first substring starting at a `{` whose braces balance, scanning for
/// the earliest complete JSON object in free-form text.
fn first_brace_balanced_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn string_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn string_array_field(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn optional_string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Normalize a code-example file path: strip a leading `./`, strip a leading
/// `/`, convert backslashes to forward slashes.
pub fn normalize_path(path: &str) -> String {
    let unbackslashed = path.replace('\\', "/");
    let stripped = unbackslashed
        .strip_prefix("./")
        .unwrap_or(&unbackslashed);
    stripped.strip_prefix('/').unwrap_or(stripped).to_string()
}

/// Keep a `[start, end]` line range only if `start >= 0 && end >= start`.
pub fn validate_line_range(start: Option<i64>, end: Option<i64>) -> (Option<u32>, Option<u32>) {
    match (start, end) {
        (Some(s), Some(e)) if s >= 0 && e >= s => (Some(s as u32), Some(e as u32)),
        _ => (None, None),
    }
}

pub fn parse_examples(value: &Value) -> Vec<CodeExample> {
    let Some(items) = value.get("examples").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let file = item.get("file").and_then(Value::as_str)?;
            let (line_start, line_end) = validate_line_range(
                item.get("lineStart").and_then(Value::as_i64),
                item.get("lineEnd").and_then(Value::as_i64),
            );
            Some(CodeExample {
                file: normalize_path(file),
                line_start,
                line_end,
                description: string_field(item, "description"),
            })
        })
        .collect()
}

/// Keep the declared diagram only if, after stripping an optional fence, it
/// begins with a recognized diagram keyword.
pub fn validate_diagram(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let stripped = extract_fenced_block(raw.trim()).unwrap_or(raw).trim();
    let starts_with_keyword = DIAGRAM_KEYWORDS
        .iter()
        .any(|kw| stripped.starts_with(kw));
    starts_with_keyword.then(|| stripped.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_raw_fenced_and_embedded() {
        assert!(extract_json(r#"{"a":1}"#).is_some());
        assert!(extract_json("here you go:\n```json\n{\"a\":1}\n```\nthanks").is_some());
        assert!(extract_json("prose before {\"a\":1} prose after").is_some());
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn extract_json_picks_first_balanced_span_not_a_stray_brace() {
        let text = r#"note: {"a": {"b": 1}} trailing }"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"]["b"], 1);
    }

    #[test]
    fn normalize_path_strips_leading_dot_slash_and_backslashes() {
        assert_eq!(normalize_path("./src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path("/src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path("src\\lib.rs"), "src/lib.rs");
    }

    #[test]
    fn validate_line_range_rejects_negative_or_inverted_ranges() {
        assert_eq!(validate_line_range(Some(1), Some(5)), (Some(1), Some(5)));
        assert_eq!(validate_line_range(Some(-1), Some(5)), (None, None));
        assert_eq!(validate_line_range(Some(5), Some(1)), (None, None));
        assert_eq!(validate_line_range(None, Some(1)), (None, None));
    }

    #[test]
    fn validate_diagram_requires_a_recognized_keyword() {
        assert_eq!(
            validate_diagram(Some("graph TD; A-->B")),
            Some("graph TD; A-->B".to_string())
        );
        assert_eq!(
            validate_diagram(Some("```mermaid\nflowchart LR\nA-->B\n```")),
            Some("flowchart LR\nA-->B".to_string())
        );
        assert_eq!(validate_diagram(Some("just some prose")), None);
        assert_eq!(validate_diagram(None), None);
    }

    #[test]
    fn string_array_field_ignores_non_string_entries() {
        let value = serde_json::json!({ "keyConcepts": ["a", 1, "b"] });
        assert_eq!(string_array_field(&value, "keyConcepts"), vec!["a", "b"]);
    }
}
