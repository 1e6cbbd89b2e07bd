use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account error: {0}")]
    Account(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Request-scoped failures, mapped to the HTTP status the caller sees.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("request contains no usable messages")]
    EmptyMessages,

    #[error("no account is currently available")]
    NoAvailableAccount,

    #[error("refresh token revoked for account {account_id}")]
    TokenRevoked { account_id: String },

    #[error("upstream rate limited (account {account_id})")]
    UpstreamRateLimited { account_id: String },

    #[error("upstream rejected request after {attempts} attempt(s): {summary}")]
    UpstreamRejected {
        attempts: usize,
        status: u16,
        summary: String,
    },

    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream error {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UnsupportedModel(_) | ProxyError::EmptyMessages => StatusCode::BAD_REQUEST,
            ProxyError::NoAvailableAccount | ProxyError::TokenRevoked { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ProxyError::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Anthropic-style error type string used in JSON error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::UnsupportedModel(_)
            | ProxyError::EmptyMessages
            | ProxyError::UpstreamRejected { .. } => "invalid_request_error",
            ProxyError::NoAvailableAccount | ProxyError::TokenRevoked { .. } => "overloaded_error",
            ProxyError::UpstreamRateLimited { .. } => "rate_limit_error",
            ProxyError::UpstreamTransient(_) | ProxyError::UpstreamStatus { .. } => "api_error",
        }
    }
}
