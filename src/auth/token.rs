//! Per-account token management: expiry checks and OAuth-style refresh with
//! social and IDC provider variants.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::constants::{REFRESH_TIMEOUT, TOKEN_TTL_CAP_SECS};
use crate::pool::account::{AuthMethod, Credentials};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("refresh network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("refresh rejected ({status}): {body}")]
    Revoked { status: u16, body: String },

    #[error("refresh transient failure ({status}): {body}")]
    Transient { status: u16, body: String },

    #[error("credentials missing {0}")]
    MissingField(&'static str),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SocialRefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdcRefreshRequest<'a> {
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    profile_arn: Option<String>,
}

const IDC_AMZ_USER_AGENT: &str =
    "aws-sdk-js/3.738.0 ua/2.1 os/other lang/js md/browser#unknown_unknown api/sso-oidc#3.738.0 m/E KiroIDE";

/// Owns one account's credentials and serializes refreshes for it. The pool
/// holds these behind `Arc` so selection can hand out a refresh-capable
/// handle without keeping its own lock across the await.
pub struct TokenManager {
    account_id: String,
    credentials: RwLock<Credentials>,
    // Single-flight guard: one refresh per account, concurrent callers
    // block here and then observe the refreshed token on re-check.
    refresh_lock: Mutex<()>,
    http: reqwest::Client,
    endpoints: EndpointConfig,
    default_region: String,
    kiro_version: String,
}

impl TokenManager {
    pub fn new(
        account_id: String,
        credentials: Credentials,
        http: reqwest::Client,
        endpoints: EndpointConfig,
        default_region: String,
        kiro_version: String,
    ) -> Self {
        Self {
            account_id,
            credentials: RwLock::new(credentials),
            refresh_lock: Mutex::new(()),
            http,
            endpoints,
            default_region,
            kiro_version,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    pub async fn replace_credentials(&self, credentials: Credentials) {
        *self.credentials.write().await = credentials;
    }

    pub async fn region(&self) -> String {
        self.credentials
            .read()
            .await
            .region
            .clone()
            .unwrap_or_else(|| self.default_region.clone())
    }

    /// Returns a valid access token, refreshing if the cached one is within
    /// the safety margin of expiry.
    pub async fn ensure_valid_token(&self) -> Result<String, RefreshError> {
        {
            let creds = self.credentials.read().await;
            if creds.token_valid_at(Utc::now()) {
                return Ok(creds.access_token.clone().unwrap_or_default());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have finished the refresh while we waited.
        {
            let creds = self.credentials.read().await;
            if creds.token_valid_at(Utc::now()) {
                debug!(
                    "[Token] account {} refreshed by concurrent caller",
                    self.account_id
                );
                return Ok(creds.access_token.clone().unwrap_or_default());
            }
        }

        let snapshot = self.credentials.read().await.clone();
        let response = match self.refresh_once(&snapshot).await {
            Ok(response) => response,
            Err(RefreshError::Transient { status, body }) => {
                let jitter = rand::thread_rng().gen_range(100u64..400);
                warn!(
                    "[Token] account {} transient refresh failure ({}), retrying in {}ms",
                    self.account_id, status, jitter
                );
                tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
                match self.refresh_once(&snapshot).await {
                    Ok(response) => response,
                    Err(RefreshError::Transient { .. }) => {
                        return Err(RefreshError::Transient { status, body })
                    }
                    Err(other) => return Err(other),
                }
            }
            Err(other) => return Err(other),
        };

        let ttl = response
            .expires_in
            .filter(|ttl| *ttl > 0)
            .unwrap_or(TOKEN_TTL_CAP_SECS)
            .min(TOKEN_TTL_CAP_SECS);
        let access_token = response.access_token.clone();

        {
            let mut creds = self.credentials.write().await;
            creds.access_token = Some(response.access_token);
            creds.expires_at = Some(Utc::now() + ChronoDuration::seconds(ttl));
            if let Some(rotated) = response.refresh_token {
                creds.refresh_token = rotated;
            }
            if let Some(arn) = response.profile_arn {
                creds.profile_arn = Some(arn);
            }
        }

        info!(
            "[Token] account {} refreshed, ttl {}s",
            self.account_id, ttl
        );
        Ok(access_token)
    }

    async fn refresh_once(&self, creds: &Credentials) -> Result<RefreshResponse, RefreshError> {
        if creds.refresh_token.is_empty() {
            return Err(RefreshError::MissingField("refreshToken"));
        }
        match creds.auth_method {
            AuthMethod::Social => self.refresh_social(creds).await,
            AuthMethod::Idc => self.refresh_idc(creds).await,
        }
    }

    async fn refresh_social(&self, creds: &Credentials) -> Result<RefreshResponse, RefreshError> {
        let region = creds.region.as_deref().unwrap_or(&self.default_region);
        let url = self.endpoints.social_refresh_for(region);
        let machine_id = creds
            .machine_id
            .clone()
            .unwrap_or_else(|| crate::pool::account::derive_machine_id(&creds.refresh_token));

        let response = self
            .http
            .post(&url)
            .timeout(REFRESH_TIMEOUT)
            .header("Accept", "application/json, text/plain, */*")
            .header("Content-Type", "application/json")
            .header(
                "User-Agent",
                format!("KiroIDE-{}-{}", self.kiro_version, machine_id),
            )
            .header("Connection", "close")
            .json(&SocialRefreshRequest {
                refresh_token: &creds.refresh_token,
            })
            .send()
            .await?;

        Self::parse_refresh_response(response).await
    }

    async fn refresh_idc(&self, creds: &Credentials) -> Result<RefreshResponse, RefreshError> {
        let client_id = creds
            .client_id
            .as_deref()
            .ok_or(RefreshError::MissingField("clientId"))?;
        let client_secret = creds
            .client_secret
            .as_deref()
            .ok_or(RefreshError::MissingField("clientSecret"))?;
        let region = creds.region.as_deref().unwrap_or(&self.default_region);
        let url = self.endpoints.idc_refresh_for(region);

        let response = self
            .http
            .post(&url)
            .timeout(REFRESH_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .header("x-amz-user-agent", IDC_AMZ_USER_AGENT)
            .header("User-Agent", "node")
            .json(&IdcRefreshRequest {
                refresh_token: &creds.refresh_token,
                client_id,
                client_secret,
                grant_type: "refresh_token",
            })
            .send()
            .await?;

        Self::parse_refresh_response(response).await
    }

    async fn parse_refresh_response(
        response: reqwest::Response,
    ) -> Result<RefreshResponse, RefreshError> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| RefreshError::Transient {
                status: status.as_u16(),
                body: format!("unparseable refresh response: {}", e),
            });
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(RefreshError::Revoked {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(RefreshError::Transient {
                status: status.as_u16(),
                body,
            })
        }
    }
}
