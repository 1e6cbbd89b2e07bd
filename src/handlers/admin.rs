//! Admin control surface consumed by the desktop UI.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::SelectionPolicy;
use crate::pool::account::AccountStatus;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialView {
    id: String,
    email: String,
    auth_method: crate::pool::account::AuthMethod,
    status: AccountStatus,
    disabled: bool,
    failure_count: u64,
    request_count: u64,
    priority: usize,
    is_current: bool,
}

pub async fn list_credentials(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (accounts, current) = state.pool.snapshot().await;
    let available = accounts
        .iter()
        .filter(|a| a.status == AccountStatus::Active)
        .count();
    let credentials: Vec<CredentialView> = accounts
        .iter()
        .enumerate()
        .map(|(index, account)| CredentialView {
            id: account.id.clone(),
            email: account.name.clone(),
            auth_method: account.credentials.auth_method,
            status: account.status,
            disabled: account.status != AccountStatus::Active,
            failure_count: account.error_count,
            request_count: account.request_count,
            priority: index,
            is_current: current.as_deref() == Some(account.id.as_str()),
        })
        .collect();

    Json(json!({
        "total": accounts.len(),
        "available": available,
        "currentId": current,
        "credentials": credentials,
    }))
}

pub async fn reset_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.pool.reset(&id).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
pub struct DisabledBody {
    pub disabled: bool,
}

pub async fn set_credential_disabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DisabledBody>,
) -> Response {
    if state.pool.shared_mode() {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "ok": false,
                "error": "pool is in shared mode; edit the shared accounts file instead"
            })),
        )
            .into_response();
    }
    match state.pool.set_disabled(&id, body.disabled).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Manual cooldown recovery: one account, or every cooled-down account when
/// no id is given.
pub async fn recover_cooldowns(
    State(state): State<AppState>,
    body: Option<Json<RecoverBody>>,
) -> Json<serde_json::Value> {
    let recovered = match body.and_then(|Json(b)| b.id) {
        Some(id) => state.pool.recover_cooldown(&id).await as usize,
        None => state.pool.recover_all_cooldowns().await,
    };
    Json(json!({"ok": true, "recovered": recovered}))
}

#[derive(Deserialize)]
pub struct RecoverBody {
    #[serde(default)]
    pub id: Option<String>,
}

/// The UI speaks in two modes: `balanced` spreads new work across accounts,
/// `priority` drains the least-used account first.
fn mode_name(policy: SelectionPolicy) -> &'static str {
    match policy {
        SelectionPolicy::RoundRobin | SelectionPolicy::Random => "balanced",
        SelectionPolicy::LeastUsed => "priority",
    }
}

pub async fn get_load_balancing(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"mode": mode_name(state.pool.policy().await)}))
}

#[derive(Deserialize)]
pub struct LoadBalancingBody {
    pub mode: String,
}

pub async fn put_load_balancing(
    State(state): State<AppState>,
    Json(body): Json<LoadBalancingBody>,
) -> Response {
    let policy = match body.mode.as_str() {
        "balanced" => SelectionPolicy::RoundRobin,
        "priority" => SelectionPolicy::LeastUsed,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "ok": false,
                    "error": format!("unknown load balancing mode: {}", other)
                })),
            )
                .into_response();
        }
    };
    state.pool.set_policy(policy).await;
    Json(json!({"ok": true, "mode": body.mode})).into_response()
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_logs_limit")]
    pub limit: usize,
}

fn default_logs_limit() -> usize {
    50
}

pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let (records, total) = state
        .request_log
        .page(query.offset, query.limit.min(500))
        .await;
    Json(json!({"total": total, "records": records}))
}
