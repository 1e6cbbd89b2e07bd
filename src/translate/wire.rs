//! Typed upstream wire form for `generateAssistantResponse`.
//!
//! The upstream parser is order-sensitive: `conversationState` fields must be
//! emitted exactly as `agentContinuationId, agentTaskType, chatTriggerType,
//! currentMessage, conversationId, history`. Serde serializes struct fields in
//! declaration order, so the declaration order below is load-bearing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    pub conversation_state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub agent_continuation_id: String,
    pub agent_task_type: String,
    pub chat_trigger_type: ChatTriggerType,
    pub current_message: CurrentMessage,
    pub conversation_id: String,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatTriggerType {
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "AUTO")]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMessage {
    pub user_input_message: UserInputMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
    pub content: String,
    pub model_id: String,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input_message_context: Option<UserInputMessageContext>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl UserInputMessageContext {
    pub fn is_empty(&self) -> bool {
        self.tools.is_none() && self.tool_results.is_none()
    }
}

/// History alternates user and assistant entries; the externally tagged enum
/// produces the `{"userInputMessage": …}` / `{"assistantResponseMessage": …}`
/// envelope the upstream expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryEntry {
    #[serde(rename = "userInputMessage")]
    User(UserInputMessage),
    #[serde(rename = "assistantResponseMessage")]
    Assistant(AssistantResponseMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_uses: Option<Vec<ToolUse>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: String,
    pub status: ToolResultStatus,
    pub content: Vec<ToolResultContent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub tool_specification: ToolSpecification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    pub json: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> ConversationState {
        ConversationState {
            agent_continuation_id: "cont-1".into(),
            agent_task_type: "vibe".into(),
            chat_trigger_type: ChatTriggerType::Manual,
            current_message: CurrentMessage {
                user_input_message: UserInputMessage {
                    content: "hi".into(),
                    model_id: "MODEL_V1".into(),
                    origin: "AI_EDITOR".into(),
                    user_input_message_context: None,
                },
            },
            conversation_id: "conv-1".into(),
            history: vec![],
        }
    }

    #[test]
    fn conversation_state_emits_fields_in_required_order() {
        let serialized = serde_json::to_string(&sample_state()).expect("serialize");
        let order = [
            "agentContinuationId",
            "agentTaskType",
            "chatTriggerType",
            "currentMessage",
            "conversationId",
            "history",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|key| serialized.find(key).unwrap_or_else(|| panic!("missing {key}")))
            .collect();
        for pair in positions.windows(2) {
            assert!(pair[0] < pair[1], "field order violated in {serialized}");
        }
    }

    #[test]
    fn trigger_type_serializes_upper_case() {
        assert_eq!(
            serde_json::to_value(ChatTriggerType::Auto).unwrap(),
            json!("AUTO")
        );
        assert_eq!(
            serde_json::to_value(ChatTriggerType::Manual).unwrap(),
            json!("MANUAL")
        );
    }

    #[test]
    fn history_entries_use_external_tags() {
        let user = HistoryEntry::User(UserInputMessage {
            content: "question".into(),
            model_id: "MODEL_V1".into(),
            origin: "AI_EDITOR".into(),
            user_input_message_context: None,
        });
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("userInputMessage").is_some());

        let assistant = HistoryEntry::Assistant(AssistantResponseMessage {
            content: "answer".into(),
            tool_uses: None,
        });
        let value = serde_json::to_value(&assistant).unwrap();
        assert!(value.get("assistantResponseMessage").is_some());
        assert!(value
            .get("assistantResponseMessage")
            .and_then(|m| m.get("toolUses"))
            .is_none());
    }

    #[test]
    fn empty_context_is_omitted_from_wire() {
        let msg = UserInputMessage {
            content: "hi".into(),
            model_id: "MODEL_V1".into(),
            origin: "AI_EDITOR".into(),
            user_input_message_context: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("userInputMessageContext").is_none());
    }
}
