use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::handlers;
use crate::middleware::auth::{admin_auth_middleware, api_auth_middleware};
use crate::monitor::RequestLog;
use crate::pool::{AccountPool, SharedFileSync};
use crate::resolver::ModelResolver;
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Arc<AccountPool>,
    pub resolver: Arc<ModelResolver>,
    pub upstream: Arc<UpstreamClient>,
    pub request_log: Arc<RequestLog>,
}

impl AppState {
    pub fn new(config: Config) -> AppResult<Self> {
        let http = crate::upstream::build_http_client(config.proxy_url.as_deref())?;
        let pool = AccountPool::new(&config, http.clone());
        let resolver = Arc::new(ModelResolver::new(&config.model_mappings));
        let upstream = Arc::new(UpstreamClient::new(&config, http));
        let request_log = Arc::new(RequestLog::new(config.log_buffer));
        Ok(Self {
            config: Arc::new(config),
            pool,
            resolver,
            upstream,
            request_log,
        })
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/messages", post(handlers::messages::handle_messages))
        .route("/v1/models", get(handlers::models::list_models))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/api/admin/credentials",
            get(handlers::admin::list_credentials),
        )
        .route(
            "/api/admin/credentials/:id/reset",
            post(handlers::admin::reset_credential),
        )
        .route(
            "/api/admin/credentials/:id/disabled",
            post(handlers::admin::set_credential_disabled),
        )
        .route(
            "/api/admin/credentials/recover",
            post(handlers::admin::recover_cooldowns),
        )
        .route(
            "/api/admin/config/load-balancing",
            get(handlers::admin::get_load_balancing).put(handlers::admin::put_load_balancing),
        )
        .route("/api/admin/logs", get(handlers::admin::get_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(api_routes)
        .merge(admin_routes)
        .with_state(state)
}

/// Binds the listener, starts the shared-file poller when configured and
/// serves until the cancellation token fires.
pub async fn run(state: AppState, cancel: CancellationToken) -> AppResult<()> {
    let sync_task = if let Some(path) = state.config.shared_accounts_file.clone() {
        let sync = Arc::new(SharedFileSync::new(path));
        if let Err(e) = sync.sync(&state.pool, true).await {
            tracing::warn!("[Sync] initial shared-file load failed: {}", e);
        }
        Some(sync.spawn_timer(state.pool.clone(), cancel.clone()))
    } else {
        None
    };

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    let app = build_router(state);
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    if let Some(task) = sync_task {
        task.abort();
    }
    Ok(())
}
