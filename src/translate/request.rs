//! Foreign request → upstream `ConversationRequest` translation.
//!
//! Translation is pure and deterministic apart from the fresh conversation
//! and continuation ids; all I/O concerns live with the caller.

use crate::constants::{
    AGENT_MODE, MAX_CURRENT_CONTENT_CHARS, MAX_TRANSLATED_MESSAGES, MESSAGE_ORIGIN,
};
use crate::error::ProxyError;
use crate::translate::content::{collect_assistant_parts, collect_user_parts};
use crate::translate::models::{ChatRequest, Message};
use crate::translate::thinking::thinking_prefix;
use crate::translate::tools::{build_tool_entries, truncate_chars, ToolNameMap};
use crate::translate::wire::{
    AssistantResponseMessage, ChatTriggerType, ConversationRequest, ConversationState,
    CurrentMessage, HistoryEntry, ToolResult, UserInputMessage, UserInputMessageContext,
};

const CONTINUE_CONTENT: &str = "continue";
const SYSTEM_ACK: &str = "I will follow these instructions.";
const ALTERNATION_FILLER: &str = "OK";

#[derive(Debug)]
pub struct TranslatedRequest {
    pub body: ConversationRequest,
    pub tool_names: ToolNameMap,
}

/// Accumulator for a same-role run while building history.
enum Turn {
    User {
        texts: Vec<String>,
        tool_results: Vec<ToolResult>,
    },
    Assistant {
        thinking: Vec<String>,
        texts: Vec<String>,
        tool_uses: Vec<crate::translate::wire::ToolUse>,
    },
}

pub fn translate_request(
    request: &ChatRequest,
    model_id: &str,
    profile_arn: Option<&str>,
) -> Result<TranslatedRequest, ProxyError> {
    let messages: Vec<&Message> = request
        .messages
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .collect();
    let window_start = messages.len().saturating_sub(MAX_TRANSLATED_MESSAGES);
    let messages = &messages[window_start..];
    if messages.is_empty() {
        return Err(ProxyError::EmptyMessages);
    }

    let mut tool_names = ToolNameMap::default();
    let tool_entries = request
        .tools
        .as_deref()
        .map(|tools| build_tool_entries(tools, &mut tool_names))
        .unwrap_or_default();

    // The contiguous trailing run of user messages is the current turn; an
    // assistant tail leaves the current turn synthetic.
    let mut current_start = messages.len();
    while current_start > 0 && messages[current_start - 1].role == "user" {
        current_start -= 1;
    }
    let (history_messages, current_messages) = messages.split_at(current_start);

    let mut history = build_history(history_messages, model_id, &mut tool_names);

    // System text (and/or a thinking directive) forms the first history pair.
    let prefix = thinking_prefix(request.thinking.as_ref());
    let system_text = request
        .system
        .as_ref()
        .map(|s| s.as_text())
        .filter(|t| !t.trim().is_empty());
    if prefix.is_some() || system_text.is_some() {
        let content = match (&prefix, &system_text) {
            (Some(p), Some(s)) => format!("{}{}", p, s),
            (Some(p), None) => p.clone(),
            (None, Some(s)) => s.clone(),
            (None, None) => unreachable!(),
        };
        history.insert(
            0,
            HistoryEntry::User(UserInputMessage {
                content,
                model_id: model_id.to_string(),
                origin: MESSAGE_ORIGIN.to_string(),
                user_input_message_context: None,
            }),
        );
        history.insert(
            1,
            HistoryEntry::Assistant(AssistantResponseMessage {
                content: SYSTEM_ACK.to_string(),
                tool_uses: None,
            }),
        );
    }

    // Current message: joined text of the trailing user run, tool results
    // aggregated from the same run only.
    let mut current_texts: Vec<String> = Vec::new();
    let mut current_tool_results: Vec<ToolResult> = Vec::new();
    for message in current_messages {
        let parts = collect_user_parts(&message.content);
        current_texts.extend(parts.text);
        current_tool_results.extend(parts.tool_results);
    }
    let joined = current_texts.join("\n");
    let content = if joined.trim().is_empty() {
        CONTINUE_CONTENT.to_string()
    } else {
        truncate_chars(&joined, MAX_CURRENT_CONTENT_CHARS)
    };

    let chat_trigger_type = if !tool_entries.is_empty()
        && request
            .tool_choice
            .as_ref()
            .map(|c| c.choice_type == "any" || c.choice_type == "tool")
            .unwrap_or(false)
    {
        ChatTriggerType::Auto
    } else {
        ChatTriggerType::Manual
    };

    let context = UserInputMessageContext {
        tools: (!tool_entries.is_empty()).then_some(tool_entries),
        tool_results: (!current_tool_results.is_empty()).then_some(current_tool_results),
    };

    let body = ConversationRequest {
        conversation_state: ConversationState {
            agent_continuation_id: uuid::Uuid::new_v4().to_string(),
            agent_task_type: AGENT_MODE.to_string(),
            chat_trigger_type,
            current_message: CurrentMessage {
                user_input_message: UserInputMessage {
                    content,
                    model_id: model_id.to_string(),
                    origin: MESSAGE_ORIGIN.to_string(),
                    user_input_message_context: (!context.is_empty()).then_some(context),
                },
            },
            conversation_id: uuid::Uuid::new_v4().to_string(),
            history,
        },
        profile_arn: profile_arn.map(String::from),
    };

    Ok(TranslatedRequest { body, tool_names })
}

/// Collapses same-role runs and maps them onto wire history entries.
/// Consecutive user messages merge into one entry with accumulated tool
/// results; consecutive assistant messages merge the same way.
fn build_history(
    messages: &[&Message],
    model_id: &str,
    tool_names: &mut ToolNameMap,
) -> Vec<HistoryEntry> {
    let mut turns: Vec<Turn> = Vec::new();

    for message in messages {
        if message.role == "user" {
            let parts = collect_user_parts(&message.content);
            match turns.last_mut() {
                Some(Turn::User {
                    texts,
                    tool_results,
                }) => {
                    texts.extend(parts.text);
                    tool_results.extend(parts.tool_results);
                }
                _ => turns.push(Turn::User {
                    texts: parts.text,
                    tool_results: parts.tool_results,
                }),
            }
        } else {
            let parts = collect_assistant_parts(&message.content, tool_names);
            match turns.last_mut() {
                Some(Turn::Assistant {
                    thinking,
                    texts,
                    tool_uses,
                }) => {
                    thinking.extend(parts.thinking);
                    texts.extend(parts.text);
                    tool_uses.extend(parts.tool_uses);
                }
                _ => turns.push(Turn::Assistant {
                    thinking: parts.thinking,
                    texts: parts.text,
                    tool_uses: parts.tool_uses,
                }),
            }
        }
    }

    let mut history: Vec<HistoryEntry> = turns
        .into_iter()
        .map(|turn| match turn {
            Turn::User {
                texts,
                tool_results,
            } => HistoryEntry::User(UserInputMessage {
                content: texts.join("\n"),
                model_id: model_id.to_string(),
                origin: MESSAGE_ORIGIN.to_string(),
                user_input_message_context: (!tool_results.is_empty()).then(|| {
                    UserInputMessageContext {
                        tools: None,
                        tool_results: Some(tool_results),
                    }
                }),
            }),
            Turn::Assistant {
                thinking,
                texts,
                tool_uses,
            } => {
                let parts = crate::translate::content::AssistantParts {
                    thinking,
                    text: texts,
                    tool_uses: Vec::new(),
                };
                HistoryEntry::Assistant(AssistantResponseMessage {
                    content: parts.render_content(),
                    tool_uses: (!tool_uses.is_empty()).then_some(tool_uses),
                })
            }
        })
        .collect();

    // A terminal user run with no assistant reply breaks alternation; close
    // it with a filler acknowledgement.
    if matches!(history.last(), Some(HistoryEntry::User(_))) {
        history.push(HistoryEntry::Assistant(AssistantResponseMessage {
            content: ALTERNATION_FILLER.to_string(),
            tool_uses: None,
        }));
    }

    history
}
