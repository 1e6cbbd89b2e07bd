//! Content block normalization for translated messages.

use serde_json::Value;

use crate::translate::models::{ContentBlock, ContentItem, MessageContent};
use crate::translate::tools::{normalize_tool_input, sanitize_tool_use_id, ToolNameMap};
use crate::translate::wire::{ToolResult, ToolResultContent, ToolResultStatus, ToolUse};

#[derive(Debug, Default)]
pub struct AssistantParts {
    pub thinking: Vec<String>,
    pub text: Vec<String>,
    pub tool_uses: Vec<ToolUse>,
}

impl AssistantParts {
    /// Renders the history entry content: accumulated thinking becomes a
    /// leading `<thinking>…</thinking>` wrapper ahead of the visible text.
    pub fn render_content(&self) -> String {
        let visible = self.text.join("\n");
        if self.thinking.is_empty() {
            visible
        } else {
            format!("<thinking>{}</thinking>{}", self.thinking.join("\n"), visible)
        }
    }
}

#[derive(Debug, Default)]
pub struct UserParts {
    pub text: Vec<String>,
    pub tool_results: Vec<ToolResult>,
}

fn scalar_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn tool_result_text(content: &Value) -> String {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        "OK".to_string()
    } else {
        text
    }
}

/// Splits assistant content into thinking, visible text and tool uses.
/// Tool names are rewritten through the rename map; `redacted_thinking`
/// blocks are dropped.
pub fn collect_assistant_parts(content: &MessageContent, names: &mut ToolNameMap) -> AssistantParts {
    let mut parts = AssistantParts::default();
    match content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                parts.text.push(text.clone());
            }
        }
        MessageContent::Blocks(items) => {
            for item in items {
                match item {
                    ContentItem::Block(ContentBlock::Text { text }) => {
                        if !text.is_empty() {
                            parts.text.push(text.clone());
                        }
                    }
                    ContentItem::Block(ContentBlock::Thinking { thinking, .. }) => {
                        if !thinking.is_empty() {
                            parts.thinking.push(thinking.clone());
                        }
                    }
                    ContentItem::Block(ContentBlock::RedactedThinking { .. }) => {}
                    ContentItem::Block(ContentBlock::ToolUse { id, name, input }) => {
                        let sanitized_name = names
                            .sanitized_for(name)
                            .map(String::from)
                            .unwrap_or_else(|| {
                                crate::translate::tools::sanitize_tool_name(name)
                            });
                        let tool_use_id = sanitize_tool_use_id(id);
                        names.record_use(&tool_use_id, name);
                        parts.tool_uses.push(ToolUse {
                            tool_use_id,
                            name: sanitized_name,
                            input: normalize_tool_input(input),
                        });
                    }
                    ContentItem::Block(ContentBlock::ToolResult { .. }) => {
                        // Tool results belong to user turns; a misplaced one
                        // is dropped rather than forwarded.
                    }
                    ContentItem::Raw(value) => {
                        if let Some(text) = scalar_as_text(value) {
                            parts.text.push(text);
                        }
                    }
                }
            }
        }
    }
    parts
}

/// Splits user content into text and tool results.
pub fn collect_user_parts(content: &MessageContent) -> UserParts {
    let mut parts = UserParts::default();
    match content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                parts.text.push(text.clone());
            }
        }
        MessageContent::Blocks(items) => {
            for item in items {
                match item {
                    ContentItem::Block(ContentBlock::Text { text }) => {
                        if !text.is_empty() {
                            parts.text.push(text.clone());
                        }
                    }
                    ContentItem::Block(ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    }) => {
                        let status = if is_error.unwrap_or(false) {
                            ToolResultStatus::Error
                        } else {
                            ToolResultStatus::Success
                        };
                        parts.tool_results.push(ToolResult {
                            tool_use_id: sanitize_tool_use_id(tool_use_id),
                            status,
                            content: vec![ToolResultContent {
                                text: tool_result_text(content),
                            }],
                        });
                    }
                    ContentItem::Block(_) => {}
                    ContentItem::Raw(value) => {
                        if let Some(text) = scalar_as_text(value) {
                            parts.text.push(text);
                        }
                    }
                }
            }
        }
    }
    parts
}
