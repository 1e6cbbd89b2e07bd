//! Degradation retry engine: when the upstream rejects a body as improperly
//! formed, the same request is retried with progressively more aggressive
//! transformations of the translator's primary output.

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::CompatMode;
use crate::error::ProxyError;
use crate::translate::wire::{ChatTriggerType, ConversationRequest, HistoryEntry};
use crate::upstream::UpstreamClient;

const COMPACT_MAX_TOOLS: usize = 24;
const COMPACT_DESCRIPTION_CHARS: usize = 256;
const TRIM_HISTORY_ENTRIES: usize = 24;
const MINIMAL_HISTORY_ENTRIES: usize = 8;
const SUMMARY_DEPTH_LIMIT: usize = 6;
const SUMMARY_ARRAY_SAMPLE: usize = 3;
const TRANSIENT_BACKOFF_MS: [u64; 2] = [500, 1000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    Primary,
    CompactTools,
    NoTools,
    TrimHistory,
    MinimalHistory,
    SingleTurn,
}

impl FallbackMode {
    pub fn label(&self) -> &'static str {
        match self {
            FallbackMode::Primary => "primary",
            FallbackMode::CompactTools => "compact-tools",
            FallbackMode::NoTools => "no-tools",
            FallbackMode::TrimHistory => "trim-history",
            FallbackMode::MinimalHistory => "minimal-history",
            FallbackMode::SingleTurn => "single-turn",
        }
    }

    /// Applies this transformation to the primary body. Every mode is
    /// idempotent: applying it twice yields an equal body.
    pub fn apply(&self, primary: &ConversationRequest) -> ConversationRequest {
        let mut body = primary.clone();
        match self {
            FallbackMode::Primary => {}
            FallbackMode::CompactTools => {
                let message = &mut body.conversation_state.current_message.user_input_message;
                if let Some(context) = message.user_input_message_context.as_mut() {
                    if let Some(tools) = context.tools.as_mut() {
                        tools.truncate(COMPACT_MAX_TOOLS);
                        for entry in tools.iter_mut() {
                            let spec = &mut entry.tool_specification;
                            spec.input_schema.json = json!({"type": "object", "properties": {}});
                            spec.description = crate::translate::tools::truncate_chars(
                                &spec.description,
                                COMPACT_DESCRIPTION_CHARS,
                            );
                        }
                    }
                }
            }
            FallbackMode::NoTools => {
                drop_tools(&mut body);
            }
            FallbackMode::TrimHistory => {
                drop_tools(&mut body);
                for entry in body.conversation_state.history.iter_mut() {
                    if let HistoryEntry::Assistant(assistant) = entry {
                        assistant.tool_uses = None;
                    }
                }
                retain_last(&mut body.conversation_state.history, TRIM_HISTORY_ENTRIES);
            }
            FallbackMode::MinimalHistory => {
                drop_tools(&mut body);
                for entry in body.conversation_state.history.iter_mut() {
                    if let HistoryEntry::User(user) = entry {
                        if let Some(context) = user.user_input_message_context.as_mut() {
                            context.tool_results = None;
                            if context.is_empty() {
                                user.user_input_message_context = None;
                            }
                        }
                    }
                }
                retain_last(&mut body.conversation_state.history, MINIMAL_HISTORY_ENTRIES);
            }
            FallbackMode::SingleTurn => {
                let state = &mut body.conversation_state;
                // Latest substantive user text, searched in history first so
                // the rebuilt turn carries the actual task; the current
                // content keeps the result stable on re-application.
                let mut content = state
                    .history
                    .iter()
                    .rev()
                    .find_map(|entry| match entry {
                        HistoryEntry::User(user)
                            if !user.content.trim().is_empty() && user.content != "continue" =>
                        {
                            Some(user.content.clone())
                        }
                        _ => None,
                    });
                if content.is_none() {
                    let current = &state.current_message.user_input_message.content;
                    if !current.trim().is_empty() && current != "continue" {
                        content = Some(current.clone());
                    }
                }
                state.history.clear();
                let message = &mut state.current_message.user_input_message;
                message.content = content.unwrap_or_else(|| "continue".to_string());
                message.user_input_message_context = None;
                state.chat_trigger_type = ChatTriggerType::Manual;
            }
        }
        body
    }
}

fn drop_tools(body: &mut ConversationRequest) {
    let state = &mut body.conversation_state;
    let message = &mut state.current_message.user_input_message;
    if let Some(context) = message.user_input_message_context.as_mut() {
        context.tools = None;
        if context.is_empty() {
            message.user_input_message_context = None;
        }
    }
    for entry in state.history.iter_mut() {
        if let HistoryEntry::User(user) = entry {
            if let Some(context) = user.user_input_message_context.as_mut() {
                context.tools = None;
                if context.is_empty() {
                    user.user_input_message_context = None;
                }
            }
        }
    }
    // AUTO is only valid with a non-empty tool list.
    state.chat_trigger_type = ChatTriggerType::Manual;
}

fn retain_last(history: &mut Vec<HistoryEntry>, keep: usize) {
    if history.len() > keep {
        history.drain(..history.len() - keep);
    }
}

pub fn modes_for(compat: CompatMode) -> &'static [FallbackMode] {
    match compat {
        CompatMode::Strict => &[FallbackMode::Primary, FallbackMode::CompactTools],
        CompatMode::Balanced => &[
            FallbackMode::Primary,
            FallbackMode::CompactTools,
            FallbackMode::NoTools,
            FallbackMode::TrimHistory,
        ],
        CompatMode::Relaxed => &[
            FallbackMode::Primary,
            FallbackMode::CompactTools,
            FallbackMode::NoTools,
            FallbackMode::TrimHistory,
            FallbackMode::MinimalHistory,
            FallbackMode::SingleTurn,
        ],
    }
}

const REJECTION_MARKERS: &[&str] = &[
    "improperly formed request",
    "malformed",
    "invalid_request_error",
];

/// A degradation retry fires only for the upstream's "improperly formed"
/// rejection class; everything else surfaces to the caller unchanged.
pub fn is_retryable_rejection(status: u16, body: &str) -> bool {
    if status != 400 {
        return false;
    }
    let lowered = body.to_lowercase();
    REJECTION_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Depth-limited structural summary of a request body, safe to surface in
/// error messages: string contents never appear, only their lengths.
pub fn redacted_summary(value: &Value) -> Value {
    summarize(value, 0)
}

fn summarize(value: &Value, depth: usize) -> Value {
    if depth >= SUMMARY_DEPTH_LIMIT {
        return Value::String("<depth limit>".to_string());
    }
    match value {
        Value::String(s) => Value::String(format!("<string len={}>", s.chars().count())),
        Value::Array(items) => json!({
            "length": items.len(),
            "sample": items
                .iter()
                .take(SUMMARY_ARRAY_SAMPLE)
                .map(|item| summarize(item, depth + 1))
                .collect::<Vec<_>>(),
        }),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                out.insert(key.clone(), summarize(child, depth + 1));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[derive(Debug)]
pub struct FallbackOutcome {
    pub response: reqwest::Response,
    pub mode: FallbackMode,
    pub attempts: usize,
}

/// Iterates the compat-mode fallback list until the upstream accepts a body
/// or the list is exhausted. Transient failures (5xx / network) are retried
/// in place with backoff before giving up on the whole call.
pub async fn send_with_degradation(
    upstream: &UpstreamClient,
    access_token: &str,
    region: &str,
    machine_id: &str,
    account_id: &str,
    primary: &ConversationRequest,
    compat: CompatMode,
) -> Result<FallbackOutcome, ProxyError> {
    let modes = modes_for(compat);
    let mut attempts = 0usize;
    let mut last_rejection: Option<(u16, ConversationRequest)> = None;

    for mode in modes {
        let body = mode.apply(primary);
        attempts += 1;

        let response =
            call_with_transient_retry(upstream, access_token, region, machine_id, &body).await?;
        let status = response.status().as_u16();

        if response.status().is_success() {
            if !matches!(mode, FallbackMode::Primary) {
                info!(
                    "[Fallback] upstream accepted after degradation to '{}'",
                    mode.label()
                );
            }
            return Ok(FallbackOutcome {
                response,
                mode: *mode,
                attempts,
            });
        }

        let text = response.text().await.unwrap_or_default();
        if is_retryable_rejection(status, &text) {
            warn!(
                "[Fallback] upstream rejected '{}' body as improperly formed, degrading",
                mode.label()
            );
            last_rejection = Some((status, body));
            continue;
        }

        return match status {
            429 => Err(ProxyError::UpstreamRateLimited {
                account_id: account_id.to_string(),
            }),
            _ => Err(ProxyError::UpstreamStatus { status, body: text }),
        };
    }

    let (status, body) = last_rejection.expect("at least one attempt recorded");
    let serialized = serde_json::to_value(&body).unwrap_or(Value::Null);
    Err(ProxyError::UpstreamRejected {
        attempts,
        status,
        summary: redacted_summary(&serialized).to_string(),
    })
}

async fn call_with_transient_retry(
    upstream: &UpstreamClient,
    access_token: &str,
    region: &str,
    machine_id: &str,
    body: &ConversationRequest,
) -> Result<reqwest::Response, ProxyError> {
    let mut backoff = TRANSIENT_BACKOFF_MS.iter();
    loop {
        let result = upstream
            .generate_assistant_response(access_token, region, machine_id, body)
            .await;
        let failure = match result {
            Ok(response) if response.status().is_server_error() => {
                format!("upstream returned {}", response.status())
            }
            Ok(response) => return Ok(response),
            Err(e) => e.to_string(),
        };
        match backoff.next() {
            Some(delay_ms) => {
                warn!("[Fallback] transient upstream failure ({}), backing off {}ms", failure, delay_ms);
                tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
            }
            None => return Err(ProxyError::UpstreamTransient(failure)),
        }
    }
}
