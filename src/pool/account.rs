//! Account and credential records, plus normalization of the external
//! shared-file representation.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Cooldown,
    Invalid,
    Disabled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Social,
    Idc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub profile_arn: Option<String>,
}

impl Credentials {
    /// Tokens within the safety margin of expiry are treated as stale.
    pub fn token_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, &self.expires_at) {
            (Some(token), Some(expires)) if !token.is_empty() => {
                (*expires - now).num_seconds() >= crate::constants::TOKEN_EXPIRY_MARGIN_SECS
            }
            _ => false,
        }
    }

    /// IDC refresh additionally requires client credentials.
    pub fn refresh_fields_present(&self) -> bool {
        if self.refresh_token.is_empty() {
            return false;
        }
        match self.auth_method {
            AuthMethod::Social => true,
            AuthMethod::Idc => self.client_id.is_some() && self.client_secret.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub credentials: Credentials,
    pub status: AccountStatus,
    pub request_count: u64,
    pub error_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage: Option<Value>,
}

impl Account {
    pub fn selectable(&self) -> bool {
        self.status == AccountStatus::Active && !self.credentials.refresh_token.is_empty()
    }
}

/// Stable machine id for credentials that do not carry one: the upstream only
/// requires it to stay consistent per account across restarts.
pub fn derive_machine_id(refresh_token: &str) -> String {
    let digest = Sha256::digest(refresh_token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// One element of the shared accounts file. The exporter has shipped both
/// camelCase and snake_case over time, so both spellings are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedAccountRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "access_token")]
    pub access_token: Option<String>,
    #[serde(default, alias = "expires_at")]
    pub expires_at: Option<Value>,
    #[serde(default, alias = "machine_id")]
    pub machine_id: Option<String>,
    #[serde(default, alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(default, alias = "client_secret")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, alias = "profile_arn")]
    pub profile_arn: Option<String>,
    #[serde(default, alias = "added_at", alias = "createdAt", alias = "created_at")]
    pub added_at: Option<Value>,
    #[serde(default, alias = "usageData", alias = "usage_data")]
    pub usage: Option<Value>,
}

/// Maps the free-form status strings seen in exported files (including the
/// CJK markers some exporters emit) onto the four pool states.
pub fn normalize_status(raw: Option<&str>) -> AccountStatus {
    let Some(raw) = raw else {
        return AccountStatus::Active;
    };
    let lowered = raw.to_lowercase();
    if lowered.contains("invalid")
        || lowered.contains("ban")
        || lowered.contains("封禁")
        || lowered.contains("失效")
    {
        AccountStatus::Invalid
    } else if lowered.contains("disabled") || lowered.contains("禁用") {
        AccountStatus::Disabled
    } else if lowered.contains("cooldown") || lowered.contains("冷却") {
        AccountStatus::Cooldown
    } else {
        AccountStatus::Active
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            s.parse::<i64>().ok().and_then(epoch_to_datetime)
        }
        Value::Number(n) => n.as_i64().and_then(epoch_to_datetime),
        _ => None,
    }
}

fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    // Exports carry either epoch seconds or epoch milliseconds.
    let millis = if raw.abs() < 100_000_000_000 { raw * 1000 } else { raw };
    Utc.timestamp_millis_opt(millis).single()
}

impl SharedAccountRecord {
    /// Infers the auth method from explicit client credentials or the
    /// provider string ("idc", "identity center", "builder" families).
    pub fn inferred_auth_method(&self) -> AuthMethod {
        if self.client_id.is_some() && self.client_secret.is_some() {
            return AuthMethod::Idc;
        }
        let provider = self.provider.as_deref().unwrap_or("").to_lowercase();
        if provider.contains("idc")
            || provider.contains("identity center")
            || provider.contains("builder")
        {
            AuthMethod::Idc
        } else {
            AuthMethod::Social
        }
    }

    /// Converts the raw record into a pool account. Records without a usable
    /// refresh token are rejected.
    pub fn into_account(self, fallback_index: usize) -> Option<Account> {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())?
            .to_string();

        let auth_method = self.inferred_auth_method();
        let status = normalize_status(self.status.as_deref());
        let id = self
            .id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.email.clone().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| format!("account-{}", fallback_index + 1));
        let name = self
            .label
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| id.clone());
        let machine_id = self
            .machine_id
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| derive_machine_id(&refresh_token));
        let created_at = self
            .added_at
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Some(Account {
            id,
            name,
            credentials: Credentials {
                refresh_token,
                access_token: self.access_token.filter(|t| !t.trim().is_empty()),
                expires_at: self.expires_at.as_ref().and_then(parse_timestamp),
                machine_id: Some(machine_id),
                region: self.region.filter(|r| !r.trim().is_empty()),
                auth_method,
                client_id: self.client_id,
                client_secret: self.client_secret,
                profile_arn: self.profile_arn,
            },
            status,
            request_count: 0,
            error_count: 0,
            created_at,
            last_used_at: None,
            usage: self.usage,
        })
    }
}
