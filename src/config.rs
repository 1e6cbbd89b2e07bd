use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::resolver::{MatchType, ModelMapping};

/// How aggressively the degradation retry engine is allowed to rewrite a
/// rejected request body before giving up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompatMode {
    Strict,
    Balanced,
    Relaxed,
}

impl Default for CompatMode {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Account selection policy for the pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    RoundRobin,
    Random,
    LeastUsed,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Refresh and generate endpoints are configuration, not code. The `{region}`
/// placeholder is substituted per credential record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_social_refresh_url")]
    pub social_refresh_url: String,
    #[serde(default = "default_idc_refresh_url")]
    pub idc_refresh_url: String,
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            social_refresh_url: default_social_refresh_url(),
            idc_refresh_url: default_idc_refresh_url(),
            upstream_base_url: default_upstream_base_url(),
        }
    }
}

fn default_social_refresh_url() -> String {
    "https://prod.{region}.auth.desktop.kiro.dev/refreshToken".to_string()
}

fn default_idc_refresh_url() -> String {
    "https://oidc.{region}.amazonaws.com/token".to_string()
}

fn default_upstream_base_url() -> String {
    "https://q.{region}.amazonaws.com".to_string()
}

impl EndpointConfig {
    pub fn social_refresh_for(&self, region: &str) -> String {
        self.social_refresh_url.replace("{region}", region)
    }

    pub fn idc_refresh_for(&self, region: &str) -> String {
        self.idc_refresh_url.replace("{region}", region)
    }

    pub fn upstream_base_for(&self, region: &str) -> String {
        self.upstream_base_url.replace("{region}", region)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Default region when a credential record does not carry one.
    #[serde(default = "default_region")]
    pub region: String,

    /// Version string embedded in the composite Kiro user agent.
    #[serde(default = "default_kiro_version")]
    pub kiro_version: String,

    /// API key clients must present on /v1 routes.
    #[serde(default)]
    pub api_key: String,

    /// Bearer key for the admin control surface.
    #[serde(default)]
    pub admin_api_key: String,

    /// Optional outbound HTTP(S) proxy for upstream and refresh calls.
    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default)]
    pub compat_mode: CompatMode,

    #[serde(default)]
    pub selection_policy: SelectionPolicy,

    /// When set, the pool runs in shared mode: this file is the authority
    /// over the account set and local mutations are rejected.
    #[serde(default)]
    pub shared_accounts_file: Option<PathBuf>,

    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Model resolution rules, highest priority first on ties.
    #[serde(default = "default_model_mappings")]
    pub model_mappings: Vec<ModelMapping>,

    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_kiro_version() -> String {
    "0.9.2".to_string()
}

fn default_log_buffer() -> usize {
    crate::constants::DEFAULT_LOG_BUFFER
}

/// Built-in resolution table. Versioned ids outrank the generic family
/// buckets so `claude-sonnet-4-5-20250929` never falls into the plain
/// `sonnet` rule.
pub fn default_model_mappings() -> Vec<ModelMapping> {
    vec![
        ModelMapping::new(
            "claude-sonnet-4-5-20250929",
            "CLAUDE_SONNET_4_5_20250929_V1_0",
            MatchType::Exact,
            100,
        ),
        ModelMapping::new(
            "claude-3-7-sonnet-20250219",
            "CLAUDE_3_7_SONNET_20250219_V1_0",
            MatchType::Exact,
            100,
        ),
        ModelMapping::new(
            r"^claude-sonnet-4-5.*",
            "CLAUDE_SONNET_4_5_20250929_V1_0",
            MatchType::Regex,
            50,
        ),
        ModelMapping::new("sonnet", "CLAUDE_SONNET_4_5_20250929_V1_0", MatchType::Contains, 10),
        ModelMapping::new("haiku", "CLAUDE_HAIKU_4_5_20251001_V1_0", MatchType::Contains, 10),
        ModelMapping::new("opus", "CLAUDE_OPUS_4_5_20251101_V1_0", MatchType::Contains, 10),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            kiro_version: default_kiro_version(),
            api_key: String::new(),
            admin_api_key: String::new(),
            proxy_url: None,
            compat_mode: CompatMode::default(),
            selection_policy: SelectionPolicy::default(),
            shared_accounts_file: None,
            endpoints: EndpointConfig::default(),
            model_mappings: default_model_mappings(),
            log_buffer: default_log_buffer(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn shared_mode(&self) -> bool {
        self.shared_accounts_file.is_some()
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::Config("apiKey must not be empty".to_string()));
        }
        if self.admin_api_key.trim().is_empty() {
            return Err(AppError::Config("adminApiKey must not be empty".to_string()));
        }
        if self.model_mappings.iter().all(|m| !m.enabled) {
            return Err(AppError::Config(
                "at least one model mapping must be enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Environment overrides for container / supervisor deployments. Invalid
/// values are ignored with a warning rather than failing startup.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(key) = std::env::var("API_KEY") {
        if !key.trim().is_empty() {
            info!("Using API key from environment");
            config.api_key = key;
        }
    }

    if let Ok(key) = std::env::var("ADMIN_API_KEY") {
        if !key.trim().is_empty() {
            info!("Using admin API key from environment");
            config.admin_api_key = key;
        }
    }

    if let Ok(port) = std::env::var("PORT") {
        let trimmed = port.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<u16>() {
                Ok(p) if p > 0 => {
                    config.port = p;
                    info!("Using port from environment: {}", p);
                }
                _ => warn!("[W-PORT-INVALID] ignoring_invalid_port_value: {}", port),
            }
        }
    }

    if let Ok(path) = std::env::var("SHARED_ACCOUNTS_FILE") {
        if !path.trim().is_empty() {
            info!("Using shared accounts file from environment: {}", path);
            config.shared_accounts_file = Some(PathBuf::from(path.trim()));
        }
    }

    if let Ok(region) = std::env::var("REGION") {
        if !region.trim().is_empty() {
            config.region = region.trim().to_string();
            info!("Using region from environment: {}", config.region);
        }
    }
}
