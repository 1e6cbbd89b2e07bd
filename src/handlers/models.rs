use axum::{extract::State, Json};
use serde_json::json;

use crate::server::AppState;

/// Externally visible model listing; the supervisor also polls this as its
/// health probe.
pub async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ids = state.resolver.external_ids().await;
    let data: Vec<serde_json::Value> = ids
        .into_iter()
        .map(|id| json!({"id": id, "object": "model", "owned_by": "pontis"}))
        .collect();
    Json(json!({"object": "list", "data": data}))
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::server::{build_router, AppState};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt as _;

    #[tokio::test]
    async fn lists_exact_mappings() {
        let mut config = Config::default();
        config.api_key = "sk-test".into();
        config.admin_api_key = "admin-test".into();
        let state = AppState::new(config).unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::get("/v1/models")
                    .header("x-api-key", "sk-test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let ids: Vec<&str> = value["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|m| m["id"].as_str())
            .collect();
        assert!(ids.contains(&"claude-sonnet-4-5-20250929"));
    }
}
