//! The `/v1/messages` handler: model resolution, account selection, token
//! refresh, translation, degradation retries and stream passthrough.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use crate::auth::RefreshError;
use crate::error::ProxyError;
use crate::fallback::{send_with_degradation, FallbackOutcome};
use crate::monitor::LogRecord;
use crate::server::AppState;
use crate::translate::{translate_request, ChatRequest};

/// One re-selection after an auth-fatal account failure.
const MAX_AUTH_RETRIES: usize = 1;
/// Up to two re-selections after upstream rate limits.
const MAX_RATE_LIMIT_RETRIES: usize = 2;

pub async fn handle_messages(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let session_id = uuid::Uuid::new_v4().to_string();

    let model_id = match state.resolver.resolve(&request.model).await {
        Ok(id) => id,
        Err(e) => {
            warn!("[{}] unsupported model '{}'", session_id, request.model);
            return finish_error(&state, &session_id, &request.model, e).await;
        }
    };
    info!(
        "[{}] {} -> {} ({} message(s))",
        session_id,
        request.model,
        model_id,
        request.messages.len()
    );

    match dispatch(&state, &session_id, &request, &model_id).await {
        Ok(outcome) => {
            record(&state, &session_id, &request.model, 200, "OK").await;
            stream_response(outcome)
        }
        Err(e) => finish_error(&state, &session_id, &request.model, e).await,
    }
}

/// Selects an account and runs the upstream call, re-selecting on rate
/// limits (up to twice) and auth-fatal failures (once).
async fn dispatch(
    state: &AppState,
    session_id: &str,
    request: &ChatRequest,
    model_id: &str,
) -> Result<FallbackOutcome, ProxyError> {
    let mut auth_retries = 0usize;
    let mut rate_limit_retries = 0usize;

    loop {
        let selection = state.pool.select().await?;
        let account_id = selection.account_id.clone();

        let access_token = match selection.manager.ensure_valid_token().await {
            Ok(token) => token,
            Err(RefreshError::Revoked { status, .. }) => {
                warn!(
                    "[{}] refresh rejected ({}) for account {}, invalidating",
                    session_id, status, account_id
                );
                state.pool.record_error(&account_id, false).await;
                state.pool.mark_invalid(&account_id).await;
                if auth_retries < MAX_AUTH_RETRIES {
                    auth_retries += 1;
                    continue;
                }
                return Err(ProxyError::TokenRevoked { account_id });
            }
            Err(e) => {
                // Network/transient refresh failures are account-local and
                // do not poison the pool.
                state.pool.record_error(&account_id, false).await;
                return Err(ProxyError::UpstreamTransient(e.to_string()));
            }
        };

        let credentials = selection.manager.credentials().await;
        let region = credentials
            .region
            .clone()
            .unwrap_or_else(|| state.config.region.clone());
        let machine_id = credentials.machine_id.clone().unwrap_or_else(|| {
            crate::pool::account::derive_machine_id(&credentials.refresh_token)
        });

        // Translation failures are local: never retried across accounts.
        let translated =
            translate_request(request, model_id, credentials.profile_arn.as_deref())?;

        match send_with_degradation(
            &state.upstream,
            &access_token,
            &region,
            &machine_id,
            &account_id,
            &translated.body,
            state.config.compat_mode,
        )
        .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(ProxyError::UpstreamRateLimited { account_id }) => {
                state.pool.record_error(&account_id, true).await;
                if rate_limit_retries < MAX_RATE_LIMIT_RETRIES {
                    rate_limit_retries += 1;
                    info!(
                        "[{}] account {} rate limited, re-selecting ({}/{})",
                        session_id, account_id, rate_limit_retries, MAX_RATE_LIMIT_RETRIES
                    );
                    continue;
                }
                return Err(ProxyError::UpstreamRateLimited { account_id });
            }
            Err(ProxyError::UpstreamStatus { status, body }) if status == 401 || status == 403 => {
                warn!(
                    "[{}] upstream auth failure ({}) on account {}",
                    session_id, status, account_id
                );
                state.pool.record_error(&account_id, false).await;
                state.pool.mark_invalid(&account_id).await;
                if auth_retries < MAX_AUTH_RETRIES {
                    auth_retries += 1;
                    continue;
                }
                return Err(ProxyError::UpstreamStatus { status, body });
            }
            Err(other) => return Err(other),
        }
    }
}

/// Forwards the accepted upstream event stream unchanged.
fn stream_response(outcome: FallbackOutcome) -> Response {
    let upstream = outcome.response;
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/event-stream")
        .to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn record(state: &AppState, session_id: &str, model: &str, status: u16, text: &str) {
    state
        .request_log
        .record(LogRecord {
            timestamp: chrono::Utc::now().timestamp_millis(),
            session_id: session_id.to_string(),
            model: model.to_string(),
            status_code: status,
            status_text: text.to_string(),
        })
        .await;
}

async fn finish_error(
    state: &AppState,
    session_id: &str,
    model: &str,
    error: ProxyError,
) -> Response {
    let status = error.status_code();
    record(state, session_id, model, status.as_u16(), &error.to_string()).await;
    error_response(status, error.error_type(), &error.to_string())
}

fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "type": "error",
            "error": {"type": error_type, "message": message}
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pool::account::{Account, AccountStatus, AuthMethod, Credentials};
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tower::ServiceExt as _;

    fn account_with_token(id: &str) -> Account {
        Account {
            id: id.to_string(),
            name: format!("{}@test", id),
            credentials: Credentials {
                refresh_token: format!("rt-{}", id),
                access_token: Some("valid-token".into()),
                expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
                machine_id: Some("m-1".into()),
                region: None,
                auth_method: AuthMethod::Social,
                client_id: None,
                client_secret: None,
                profile_arn: None,
            },
            status: AccountStatus::Active,
            request_count: 0,
            error_count: 0,
            created_at: chrono::Utc::now(),
            last_used_at: None,
            usage: None,
        }
    }

    async fn state_with_mock_upstream(
        upstream_status: StatusCode,
        upstream_body: &'static str,
    ) -> (AppState, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let app = Router::new().route(
            "/generateAssistantResponse",
            post(move || {
                let calls = handler_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (upstream_status, upstream_body)
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = Config::default();
        config.api_key = "sk-test".into();
        config.admin_api_key = "admin-test".into();
        config.endpoints.upstream_base_url = format!("http://{}", addr);
        let state = AppState::new(config).unwrap();
        state.pool.add_account(account_with_token("a1")).await.unwrap();
        (state, calls, server)
    }

    fn messages_request(body: serde_json::Value) -> Request<Body> {
        Request::post("/v1/messages")
            .header("content-type", "application/json")
            .header("x-api-key", "sk-test")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn success_streams_upstream_bytes() {
        let (state, calls, server) =
            state_with_mock_upstream(StatusCode::OK, "streamed-payload").await;
        let app = crate::server::build_router(state.clone());

        let response = app
            .oneshot(messages_request(json!({
                "model": "claude-sonnet-4-5",
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"streamed-payload");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Exactly one selection happened for the request.
        let account = state.pool.account("a1").await.unwrap();
        assert_eq!(account.request_count, 1);

        let (page, total) = state.request_log.page(0, 10).await;
        assert_eq!(total, 1);
        assert_eq!(page[0].status_code, 200);
        server.abort();
    }

    #[tokio::test]
    async fn unsupported_model_is_a_local_400() {
        let (state, calls, server) = state_with_mock_upstream(StatusCode::OK, "x").await;
        let app = crate::server::build_router(state);

        let response = app
            .oneshot(messages_request(json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        server.abort();
    }

    #[tokio::test]
    async fn empty_messages_fail_without_selection() {
        let (state, calls, server) = state_with_mock_upstream(StatusCode::OK, "x").await;
        let app = crate::server::build_router(state.clone());

        let response = app
            .oneshot(messages_request(json!({
                "model": "claude-sonnet-4-5",
                "messages": []
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        server.abort();
    }

    #[tokio::test]
    async fn rate_limited_accounts_rotate_then_503_when_exhausted() {
        let (state, _calls, server) =
            state_with_mock_upstream(StatusCode::TOO_MANY_REQUESTS, "slow down").await;
        state.pool.add_account(account_with_token("a2")).await.unwrap();
        let app = crate::server::build_router(state.clone());

        let response = app
            .oneshot(messages_request(json!({
                "model": "claude-sonnet-4-5",
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .await
            .unwrap();

        // Both accounts got rate limited and moved to cooldown; the request
        // ends once re-selection finds nothing active.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            state.pool.status_of("a1").await,
            Some(AccountStatus::Cooldown)
        );
        assert_eq!(
            state.pool.status_of("a2").await,
            Some(AccountStatus::Cooldown)
        );
        server.abort();
    }

    #[tokio::test]
    async fn upstream_auth_failure_invalidates_and_retries_other_account() {
        let (state, calls, server) =
            state_with_mock_upstream(StatusCode::FORBIDDEN, "expired").await;
        state.pool.add_account(account_with_token("a2")).await.unwrap();
        let app = crate::server::build_router(state.clone());

        let response = app
            .oneshot(messages_request(json!({
                "model": "claude-sonnet-4-5",
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .await
            .unwrap();

        // Both attempts fail 403: first invalidates a1, retry invalidates a2.
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.pool.status_of("a1").await, Some(AccountStatus::Invalid));
        assert_eq!(state.pool.status_of("a2").await, Some(AccountStatus::Invalid));
        server.abort();
    }

    #[tokio::test]
    async fn no_accounts_is_503() {
        let mut config = Config::default();
        config.api_key = "sk-test".into();
        config.admin_api_key = "admin-test".into();
        let state = AppState::new(config).unwrap();
        let app = crate::server::build_router(state);

        let response = app
            .oneshot(messages_request(json!({
                "model": "claude-sonnet-4-5",
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
