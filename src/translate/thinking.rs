use crate::constants::DEFAULT_THINKING_BUDGET;
use crate::translate::models::ThinkingConfig;

/// Directive prefix injected ahead of the system text when the caller enables
/// extended thinking. The upstream reads it out of the first history turn.
pub fn thinking_prefix(thinking: Option<&ThinkingConfig>) -> Option<String> {
    let config = thinking?;
    if !config.is_enabled() {
        return None;
    }
    let budget = config.budget_tokens.unwrap_or(DEFAULT_THINKING_BUDGET);
    Some(format!(
        "<thinking_mode>enabled</thinking_mode><max_thinking_length>{}</max_thinking_length>",
        budget
    ))
}
