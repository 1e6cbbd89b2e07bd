use std::time::Duration;

/// Access tokens are treated as expired this long before their reported expiry.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Upper bound applied to upstream-reported token TTLs.
pub const TOKEN_TTL_CAP_SECS: i64 = 3600;

/// How long a rate-limited account stays in cooldown before auto-recovery.
pub const COOLDOWN_RECOVERY: Duration = Duration::from_secs(5 * 60);

/// Poll interval for the shared accounts file.
pub const SHARED_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Read timeout for a single shared-file sync pass.
pub const SHARED_SYNC_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for a single token refresh call.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Only the trailing window of the foreign conversation is translated.
pub const MAX_TRANSLATED_MESSAGES: usize = 200;

/// Hard cap on the current message content forwarded upstream.
pub const MAX_CURRENT_CONTENT_CHARS: usize = 12_000;

/// Tool description cap in the primary request body.
pub const MAX_TOOL_DESCRIPTION_CHARS: usize = 2_000;

/// Default thinking budget when the caller enables thinking without one.
pub const DEFAULT_THINKING_BUDGET: u32 = 10_000;

/// SDK identity embedded in the composite upstream user agent.
pub const SDK_USER_AGENT_PREFIX: &str = "aws-sdk-js/1.0.27";

/// Agent mode advertised to the upstream.
pub const AGENT_MODE: &str = "vibe";

/// Origin marker the upstream expects on every user input message.
pub const MESSAGE_ORIGIN: &str = "AI_EDITOR";

/// In-memory request log ring capacity.
pub const DEFAULT_LOG_BUFFER: usize = 500;
