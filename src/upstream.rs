//! Outbound client for the Q code-assistant upstream.

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, EndpointConfig};
use crate::constants::{AGENT_MODE, SDK_USER_AGENT_PREFIX};
use crate::error::AppResult;
use crate::translate::wire::ConversationRequest;

/// Builds the process-wide HTTP client shared by refresh and generate calls.
/// Generate responses stream, so no overall request timeout is imposed here;
/// per-call timeouts are set where bounded calls need them.
pub fn build_http_client(proxy_url: Option<&str>) -> AppResult<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(20))
        .pool_max_idle_per_host(16)
        .tcp_keepalive(Duration::from_secs(60));

    if let Some(url) = proxy_url.filter(|u| !u.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| crate::error::AppError::Config(format!("invalid proxy url: {}", e)))?;
        builder = builder.proxy(proxy);
        tracing::info!("Outbound proxy enabled: {}", url);
    }

    Ok(builder.build()?)
}

pub struct UpstreamClient {
    client: Client,
    endpoints: EndpointConfig,
    kiro_version: String,
}

impl UpstreamClient {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            endpoints: config.endpoints.clone(),
            kiro_version: config.kiro_version.clone(),
        }
    }

    #[cfg(test)]
    pub fn new_for_test(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoints: EndpointConfig {
                social_refresh_url: format!("{}/refreshToken", base_url),
                idc_refresh_url: format!("{}/token", base_url),
                upstream_base_url: base_url.to_string(),
            },
            kiro_version: "0.9.2".to_string(),
        }
    }

    fn composite_user_agent(&self, machine_id: &str) -> (String, String) {
        let tag = format!("KiroIDE-{}-{}", self.kiro_version, machine_id);
        let user_agent = format!(
            "{} ua/2.1 os/darwin#24.6.0 lang/js md/nodejs#22.21.1 api/codewhispererstreaming#1.0.27 m/E {}",
            SDK_USER_AGENT_PREFIX, tag
        );
        let amz_user_agent = format!("{} {}", SDK_USER_AGENT_PREFIX, tag);
        (user_agent, amz_user_agent)
    }

    /// Sends one generate call. The response body is an event stream the
    /// caller forwards unchanged; status classification happens there.
    pub async fn generate_assistant_response(
        &self,
        access_token: &str,
        region: &str,
        machine_id: &str,
        body: &ConversationRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let base = self.endpoints.upstream_base_for(region);
        let url = format!("{}/generateAssistantResponse", base);
        let host = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        let (user_agent, amz_user_agent) = self.composite_user_agent(machine_id);

        debug!("[Upstream] POST {}", url);
        self.client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-amzn-codewhisperer-optout", "true")
            .header("x-amzn-kiro-agent-mode", AGENT_MODE)
            .header("x-amz-user-agent", amz_user_agent)
            .header("User-Agent", user_agent)
            .header("Host", host)
            .header("amz-sdk-invocation-id", uuid::Uuid::new_v4().to_string())
            .header("amz-sdk-request", "attempt=1; max=3")
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Connection", "close")
            .json(body)
            .send()
            .await
    }
}
