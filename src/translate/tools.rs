//! Tool definition sanitization for the upstream wire format.
//!
//! Upstream tool names are limited to `[A-Za-z0-9_]` and must be unique per
//! request, so foreign names are rewritten and the rename map retained for
//! mapping response tool-use ids back to the caller's names.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::constants::MAX_TOOL_DESCRIPTION_CHARS;
use crate::translate::models::ToolDefinition;
use crate::translate::wire::{InputSchema, ToolEntry, ToolSpecification};

const SCHEMA_DEPTH_LIMIT: usize = 6;
const SCHEMA_MAX_ARRAY_ITEMS: usize = 32;
const SCHEMA_MAX_OBJECT_ENTRIES: usize = 96;
const SCHEMA_DESCRIPTION_CHARS: usize = 512;
const SCHEMA_STRING_CHARS: usize = 1024;

const SCHEMA_DROP_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$defs",
    "definitions",
    "examples",
    "example",
    "deprecated",
    "readOnly",
    "writeOnly",
];

/// Bidirectional rename map produced alongside a translated request.
#[derive(Debug, Clone, Default)]
pub struct ToolNameMap {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
    use_ids: HashMap<String, String>,
}

impl ToolNameMap {
    pub fn insert(&mut self, original: &str, sanitized: &str) {
        self.forward.insert(original.to_string(), sanitized.to_string());
        self.reverse.insert(sanitized.to_string(), original.to_string());
    }

    pub fn sanitized_for(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    pub fn original_for(&self, sanitized: &str) -> Option<&str> {
        self.reverse.get(sanitized).map(String::as_str)
    }

    /// Correlates a request-side tool-use id with the foreign tool name so
    /// ids seen later in the response resolve back to the caller's name.
    pub fn record_use(&mut self, tool_use_id: &str, original_name: &str) {
        self.use_ids
            .insert(tool_use_id.to_string(), original_name.to_string());
    }

    pub fn original_for_use_id(&self, tool_use_id: &str) -> Option<&str> {
        self.use_ids.get(tool_use_id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.use_ids.is_empty()
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Rewrites a foreign tool name into the upstream alphabet: invalid runs
/// collapse to a single underscore, edges are trimmed, and a leading digit
/// gets a `t_` prefix.
pub fn sanitize_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    let base = if trimmed.is_empty() { "tool" } else { trimmed };
    if base.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("t_{}", base)
    } else {
        base.to_string()
    }
}

fn unique_name(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{}_{}", base, suffix);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}

fn sanitize_schema_value(value: &Value, depth: usize) -> Value {
    match value {
        Value::Object(map) => {
            if depth >= SCHEMA_DEPTH_LIMIT {
                return Value::Object(Map::new());
            }
            let mut out = Map::new();
            for (key, child) in map.iter() {
                if SCHEMA_DROP_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if out.len() >= SCHEMA_MAX_OBJECT_ENTRIES {
                    break;
                }
                let sanitized = match child {
                    Value::String(s) => {
                        let cap = if key == "description" || key == "title" {
                            SCHEMA_DESCRIPTION_CHARS
                        } else {
                            SCHEMA_STRING_CHARS
                        };
                        Value::String(truncate_chars(s, cap))
                    }
                    other => sanitize_schema_value(other, depth + 1),
                };
                out.insert(key.clone(), sanitized);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            if depth >= SCHEMA_DEPTH_LIMIT {
                return Value::Array(Vec::new());
            }
            Value::Array(
                items
                    .iter()
                    .take(SCHEMA_MAX_ARRAY_ITEMS)
                    .map(|item| sanitize_schema_value(item, depth + 1))
                    .collect(),
            )
        }
        Value::String(s) => Value::String(truncate_chars(s, SCHEMA_STRING_CHARS)),
        other => other.clone(),
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Sanitizes a foreign input schema; never trusts wire field types.
pub fn sanitize_input_schema(schema: Option<&Value>) -> Value {
    let sanitized = match schema {
        Some(value @ Value::Object(_)) => sanitize_schema_value(value, 0),
        _ => Value::Object(Map::new()),
    };
    match &sanitized {
        Value::Object(map) if map.is_empty() => empty_object_schema(),
        _ => sanitized,
    }
}

/// Builds the upstream tool list and the rename map. Web-search variants are
/// dropped; duplicates after sanitization get `_2`, `_3`, … suffixes.
pub fn build_tool_entries(
    tools: &[ToolDefinition],
    names: &mut ToolNameMap,
) -> Vec<ToolEntry> {
    let mut taken = HashSet::new();
    let mut entries = Vec::new();

    for tool in tools {
        if tool.is_web_search() {
            tracing::debug!("[Tools] Dropping unsupported web search tool");
            continue;
        }
        let Some(original) = tool.name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        let sanitized = unique_name(&sanitize_tool_name(original), &mut taken);
        names.insert(original, &sanitized);

        let description = truncate_chars(
            tool.description.as_deref().unwrap_or(""),
            MAX_TOOL_DESCRIPTION_CHARS,
        );
        entries.push(ToolEntry {
            tool_specification: ToolSpecification {
                name: sanitized,
                description,
                input_schema: InputSchema {
                    json: sanitize_input_schema(tool.input_schema.as_ref()),
                },
            },
        });
    }

    entries
}

/// Tool-use ids are forwarded, but restricted to `[\w\-:.]` and 128 chars.
pub fn sanitize_tool_use_id(id: &str) -> String {
    let filtered: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
        .take(128)
        .collect();
    if filtered.is_empty() {
        format!("tooluse_{}", uuid::Uuid::new_v4().simple())
    } else {
        filtered
    }
}

/// Normalizes a tool-use input into a JSON object: strings are parsed,
/// anything that still is not an object becomes `{}`.
pub fn normalize_tool_input(input: &Value) -> Value {
    match input {
        Value::Object(_) => input.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::Object(Map::new()),
        },
        _ => Value::Object(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolDefinition {
        serde_json::from_value(json!({"name": name, "input_schema": {"type": "object"}})).unwrap()
    }

    #[test]
    fn digit_prefix_gets_t_marker() {
        assert_eq!(sanitize_tool_name("3d-lookup"), "t_3d_lookup");
    }

    #[test]
    fn invalid_runs_collapse_and_edges_trim() {
        assert_eq!(sanitize_tool_name("read--file"), "read_file");
        assert_eq!(sanitize_tool_name("__weird__"), "weird");
        assert_eq!(sanitize_tool_name("mcp__fs__read"), "mcp_fs_read");
        assert_eq!(sanitize_tool_name("!!!"), "tool");
    }

    #[test]
    fn duplicates_get_numeric_suffixes() {
        let tools = vec![tool("read-file"), tool("read_file"), tool("read.file")];
        let mut names = ToolNameMap::default();
        let entries = build_tool_entries(&tools, &mut names);
        let emitted: Vec<&str> = entries
            .iter()
            .map(|e| e.tool_specification.name.as_str())
            .collect();
        assert_eq!(emitted, vec!["read_file", "read_file_2", "read_file_3"]);
        assert_eq!(names.original_for("read_file_3"), Some("read.file"));
    }

    #[test]
    fn every_emitted_name_matches_upstream_alphabet() {
        let tools = vec![tool("3d-lookup"), tool("weird name!"), tool("ok")];
        let mut names = ToolNameMap::default();
        let entries = build_tool_entries(&tools, &mut names);
        let re = regex::Regex::new(r"^(t_)?[A-Za-z0-9_]+$").unwrap();
        let mut seen = HashSet::new();
        for entry in &entries {
            let name = &entry.tool_specification.name;
            assert!(re.is_match(name), "bad name {name}");
            assert!(seen.insert(name.clone()), "duplicate name {name}");
        }
    }

    #[test]
    fn web_search_tools_are_dropped() {
        let tools = vec![tool("web_search"), tool("read_file")];
        let mut names = ToolNameMap::default();
        let entries = build_tool_entries(&tools, &mut names);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool_specification.name, "read_file");
        assert!(names.sanitized_for("web_search").is_none());
    }

    #[test]
    fn schema_drops_meta_keys_and_caps_strings() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "definitions": {"x": {}},
            "type": "object",
            "description": "d".repeat(600),
            "properties": {
                "path": {"type": "string", "enum": ["a".repeat(2000)]}
            }
        });
        let sanitized = sanitize_input_schema(Some(&schema));
        assert!(sanitized.get("$schema").is_none());
        assert!(sanitized.get("definitions").is_none());
        assert_eq!(
            sanitized["description"].as_str().unwrap().chars().count(),
            512
        );
        assert_eq!(
            sanitized["properties"]["path"]["enum"][0]
                .as_str()
                .unwrap()
                .chars()
                .count(),
            1024
        );
    }

    #[test]
    fn schema_depth_and_breadth_limits_apply() {
        let mut deep = json!({"leaf": true});
        for _ in 0..10 {
            deep = json!({"nested": deep});
        }
        let sanitized = sanitize_input_schema(Some(&deep));
        // Walking 6 levels down must terminate in an empty object.
        let mut cursor = &sanitized;
        let mut levels = 0;
        while let Some(next) = cursor.get("nested") {
            cursor = next;
            levels += 1;
        }
        assert!(levels <= SCHEMA_DEPTH_LIMIT);

        let wide_array = json!({"items": (0..100).map(|i| json!(i)).collect::<Vec<_>>()});
        let sanitized = sanitize_input_schema(Some(&wide_array));
        assert_eq!(
            sanitized["items"].as_array().unwrap().len(),
            SCHEMA_MAX_ARRAY_ITEMS
        );
    }

    #[test]
    fn non_object_or_empty_schema_becomes_default() {
        assert_eq!(
            sanitize_input_schema(None),
            json!({"type": "object", "properties": {}})
        );
        assert_eq!(
            sanitize_input_schema(Some(&json!("not a schema"))),
            json!({"type": "object", "properties": {}})
        );
        assert_eq!(
            sanitize_input_schema(Some(&json!({"$schema": "x"}))),
            json!({"type": "object", "properties": {}})
        );
    }

    #[test]
    fn tool_use_id_is_filtered_and_capped() {
        assert_eq!(sanitize_tool_use_id("tu_1"), "tu_1");
        assert_eq!(sanitize_tool_use_id("tu 1/b"), "tu1b");
        let long = "x".repeat(300);
        assert_eq!(sanitize_tool_use_id(&long).len(), 128);
    }

    #[test]
    fn tool_input_normalizes_strings_and_garbage() {
        assert_eq!(
            normalize_tool_input(&json!("{\"path\": \"/a\"}")),
            json!({"path": "/a"})
        );
        assert_eq!(normalize_tool_input(&json!("not json")), json!({}));
        assert_eq!(normalize_tool_input(&json!([1, 2])), json!({}));
        assert_eq!(
            normalize_tool_input(&json!({"k": 1})),
            json!({"k": 1})
        );
    }
}
