//! Multi-account pool: selection policies, per-account counters and the
//! cooldown/invalidation state machine.
//!
//! All pool state lives behind one `RwLock`; selection, counter updates and
//! state transitions commit atomically under it. Token refresh happens on the
//! returned manager handle after the lock is released.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::auth::TokenManager;
use crate::config::{Config, SelectionPolicy};
use crate::constants::COOLDOWN_RECOVERY;
use crate::error::{AppError, AppResult, ProxyError};
use crate::pool::account::{Account, AccountStatus};

pub struct Selection {
    pub account_id: String,
    pub manager: Arc<TokenManager>,
}

struct PoolInner {
    order: Vec<String>,
    accounts: HashMap<String, Account>,
    managers: HashMap<String, Arc<TokenManager>>,
    cursor: usize,
    policy: SelectionPolicy,
    last_selected: Option<String>,
}

pub struct AccountPool {
    inner: RwLock<PoolInner>,
    shared_mode: bool,
    http: reqwest::Client,
    endpoints: crate::config::EndpointConfig,
    default_region: String,
    kiro_version: String,
    // Handle for cooldown timers to find their way back without keeping the
    // pool alive.
    self_ref: Weak<AccountPool>,
}

impl AccountPool {
    pub fn new(config: &Config, http: reqwest::Client) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            inner: RwLock::new(PoolInner {
                order: Vec::new(),
                accounts: HashMap::new(),
                managers: HashMap::new(),
                cursor: 0,
                policy: config.selection_policy,
                last_selected: None,
            }),
            shared_mode: config.shared_mode(),
            http,
            endpoints: config.endpoints.clone(),
            default_region: config.region.clone(),
            kiro_version: config.kiro_version.clone(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn shared_mode(&self) -> bool {
        self.shared_mode
    }

    fn build_manager(&self, account: &Account) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            account.id.clone(),
            account.credentials.clone(),
            self.http.clone(),
            self.endpoints.clone(),
            self.default_region.clone(),
            self.kiro_version.clone(),
        ))
    }

    /// Adds a locally managed account. Rejected in shared mode, where the
    /// file is the only authority over the account set.
    pub async fn add_account(&self, account: Account) -> AppResult<()> {
        if self.shared_mode {
            return Err(AppError::Account(
                "account mutations are rejected in shared mode".to_string(),
            ));
        }
        let manager = self.build_manager(&account);
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&account.id) {
            inner.order.push(account.id.clone());
        }
        inner.managers.insert(account.id.clone(), manager);
        inner.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    pub async fn remove_account(&self, id: &str) -> AppResult<()> {
        if self.shared_mode {
            return Err(AppError::Account(
                "account mutations are rejected in shared mode".to_string(),
            ));
        }
        let mut inner = self.inner.write().await;
        inner.order.retain(|existing| existing != id);
        inner.accounts.remove(id);
        inner.managers.remove(id);
        Ok(())
    }

    /// Replaces the account set from a shared-file snapshot. Runtime
    /// counters and a standing cooldown survive for records present in both
    /// generations; records absent from the new file are dropped.
    pub async fn apply_snapshot(&self, accounts: Vec<Account>) {
        let mut inner = self.inner.write().await;

        let mut order = Vec::with_capacity(accounts.len());
        let mut accounts_map = HashMap::with_capacity(accounts.len());
        let mut managers = HashMap::with_capacity(accounts.len());
        for mut account in accounts {
            let manager = match inner.accounts.get(&account.id) {
                Some(existing) => {
                    account.request_count = existing.request_count;
                    account.error_count = existing.error_count;
                    account.last_used_at = existing.last_used_at;
                    if existing.status == AccountStatus::Cooldown
                        && account.status == AccountStatus::Active
                    {
                        account.status = AccountStatus::Cooldown;
                    }
                    if existing.credentials.refresh_token == account.credentials.refresh_token {
                        inner.managers.get(&account.id).cloned()
                    } else {
                        None
                    }
                }
                None => None,
            };
            let manager = manager.unwrap_or_else(|| self.build_manager(&account));
            order.push(account.id.clone());
            managers.insert(account.id.clone(), manager);
            accounts_map.insert(account.id.clone(), account);
        }

        inner.order = order;
        inner.accounts = accounts_map;
        inner.managers = managers;
        if let Some(last) = inner.last_selected.clone() {
            if !inner.accounts.contains_key(&last) {
                inner.last_selected = None;
            }
        }
    }

    /// Picks an account under the active policy and bumps its counters in
    /// the same critical section.
    pub async fn select(&self) -> Result<Selection, ProxyError> {
        let mut inner = self.inner.write().await;

        let eligible: Vec<String> = inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .accounts
                    .get(*id)
                    .map(Account::selectable)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Err(ProxyError::NoAvailableAccount);
        }

        let selected = match inner.policy {
            SelectionPolicy::RoundRobin => {
                let index = inner.cursor % eligible.len();
                inner.cursor = inner.cursor.wrapping_add(1);
                eligible[index].clone()
            }
            SelectionPolicy::Random => {
                let index = rand::thread_rng().gen_range(0..eligible.len());
                eligible[index].clone()
            }
            SelectionPolicy::LeastUsed => {
                // First-lowest wins, so ties break by insertion order.
                let mut best = eligible[0].clone();
                let mut best_count = inner.accounts[&best].request_count;
                for id in &eligible[1..] {
                    let count = inner.accounts[id].request_count;
                    if count < best_count {
                        best = id.clone();
                        best_count = count;
                    }
                }
                best
            }
        };

        let manager = inner
            .managers
            .get(&selected)
            .cloned()
            .ok_or(ProxyError::NoAvailableAccount)?;
        let account = inner
            .accounts
            .get_mut(&selected)
            .expect("selected account present");
        account.request_count += 1;
        account.last_used_at = Some(chrono::Utc::now());
        inner.last_selected = Some(selected.clone());

        Ok(Selection {
            account_id: selected,
            manager,
        })
    }

    /// Records a request failure. A rate limit moves an active account into
    /// cooldown and schedules automatic recovery.
    pub async fn record_error(&self, id: &str, is_rate_limit: bool) {
        let schedule_recovery = {
            let mut inner = self.inner.write().await;
            let Some(account) = inner.accounts.get_mut(id) else {
                return;
            };
            account.error_count += 1;
            if is_rate_limit && account.status == AccountStatus::Active {
                account.status = AccountStatus::Cooldown;
                warn!("[Pool] account {} rate limited, entering cooldown", id);
                true
            } else {
                false
            }
        };

        if schedule_recovery {
            let pool = self.self_ref.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(COOLDOWN_RECOVERY).await;
                let Some(pool) = pool.upgrade() else { return };
                let mut inner = pool.inner.write().await;
                // Only complete the cooldown if nothing else moved the
                // account in the meantime.
                if let Some(account) = inner.accounts.get_mut(&id) {
                    if account.status == AccountStatus::Cooldown {
                        account.status = AccountStatus::Active;
                        info!("[Pool] account {} recovered from cooldown", id);
                    }
                }
            });
        }
    }

    /// Auth-fatal transition; terminal except via external edit.
    pub async fn mark_invalid(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.accounts.get_mut(id) {
            if account.status != AccountStatus::Invalid {
                warn!("[Pool] account {} marked invalid", id);
            }
            account.status = AccountStatus::Invalid;
        }
    }

    pub async fn recover_cooldown(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.accounts.get_mut(id) {
            Some(account) if account.status == AccountStatus::Cooldown => {
                account.status = AccountStatus::Active;
                info!("[Pool] account {} manually recovered", id);
                true
            }
            _ => false,
        }
    }

    pub async fn recover_all_cooldowns(&self) -> usize {
        let mut inner = self.inner.write().await;
        let mut recovered = 0;
        for account in inner.accounts.values_mut() {
            if account.status == AccountStatus::Cooldown {
                account.status = AccountStatus::Active;
                recovered += 1;
            }
        }
        recovered
    }

    /// Manual enable/disable. Forbidden in shared mode.
    pub async fn set_disabled(&self, id: &str, disabled: bool) -> AppResult<()> {
        if self.shared_mode {
            return Err(AppError::Account(
                "enable/disable is rejected in shared mode".to_string(),
            ));
        }
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(id)
            .ok_or_else(|| AppError::Account(format!("unknown account: {}", id)))?;
        match (account.status, disabled) {
            (AccountStatus::Active, true) => account.status = AccountStatus::Disabled,
            (AccountStatus::Disabled, false) => account.status = AccountStatus::Active,
            _ => {}
        }
        Ok(())
    }

    /// Resets counters and returns the account to active.
    pub async fn reset(&self, id: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(id)
            .ok_or_else(|| AppError::Account(format!("unknown account: {}", id)))?;
        account.request_count = 0;
        account.error_count = 0;
        account.status = AccountStatus::Active;
        Ok(())
    }

    pub async fn set_policy(&self, policy: SelectionPolicy) {
        self.inner.write().await.policy = policy;
    }

    pub async fn policy(&self) -> SelectionPolicy {
        self.inner.read().await.policy
    }

    pub async fn status_of(&self, id: &str) -> Option<AccountStatus> {
        self.inner.read().await.accounts.get(id).map(|a| a.status)
    }

    pub async fn account(&self, id: &str) -> Option<Account> {
        self.inner.read().await.accounts.get(id).cloned()
    }

    /// Ordered snapshot for the admin surface.
    pub async fn snapshot(&self) -> (Vec<Account>, Option<String>) {
        let inner = self.inner.read().await;
        let accounts = inner
            .order
            .iter()
            .filter_map(|id| inner.accounts.get(id))
            .cloned()
            .collect();
        (accounts, inner.last_selected.clone())
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::account::{AuthMethod, Credentials};
    use chrono::Utc;

    fn test_account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            name: id.to_string(),
            credentials: Credentials {
                refresh_token: format!("refresh-{}", id),
                access_token: None,
                expires_at: None,
                machine_id: None,
                region: None,
                auth_method: AuthMethod::Social,
                client_id: None,
                client_secret: None,
                profile_arn: None,
            },
            status: AccountStatus::Active,
            request_count: 0,
            error_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
            usage: None,
        }
    }

    fn pool_with_policy(policy: SelectionPolicy) -> Arc<AccountPool> {
        let mut config = Config::default();
        config.selection_policy = policy;
        AccountPool::new(&config, reqwest::Client::new())
    }

    async fn seed(pool: &AccountPool, ids: &[&str]) {
        for id in ids {
            pool.add_account(test_account(id)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn round_robin_under_churn() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A", "B"]).await;

        assert_eq!(pool.select().await.unwrap().account_id, "A");

        // Disable A: the cursor is reinterpreted modulo the shrunken set.
        {
            let mut inner = pool.inner.write().await;
            inner.accounts.get_mut("A").unwrap().status = AccountStatus::Disabled;
        }
        assert_eq!(pool.select().await.unwrap().account_id, "B");

        {
            let mut inner = pool.inner.write().await;
            inner.accounts.get_mut("A").unwrap().status = AccountStatus::Active;
        }
        assert_eq!(pool.select().await.unwrap().account_id, "A");
        assert_eq!(pool.select().await.unwrap().account_id, "B");
    }

    #[tokio::test]
    async fn selection_bumps_counters_atomically() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A"]).await;

        let selection = pool.select().await.unwrap();
        assert_eq!(selection.account_id, "A");
        let account = pool.account("A").await.unwrap();
        assert_eq!(account.request_count, 1);
        assert!(account.last_used_at.is_some());
    }

    #[tokio::test]
    async fn least_used_breaks_ties_by_insertion_order() {
        let pool = pool_with_policy(SelectionPolicy::LeastUsed);
        seed(&pool, &["A", "B", "C"]).await;

        assert_eq!(pool.select().await.unwrap().account_id, "A");
        assert_eq!(pool.select().await.unwrap().account_id, "B");
        assert_eq!(pool.select().await.unwrap().account_id, "C");
        // All equal again: first in insertion order wins.
        assert_eq!(pool.select().await.unwrap().account_id, "A");
    }

    #[tokio::test]
    async fn random_only_picks_eligible() {
        let pool = pool_with_policy(SelectionPolicy::Random);
        seed(&pool, &["A", "B"]).await;
        pool.mark_invalid("A").await;
        for _ in 0..10 {
            assert_eq!(pool.select().await.unwrap().account_id, "B");
        }
    }

    #[tokio::test]
    async fn empty_pool_reports_no_available_account() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        assert!(matches!(
            pool.select().await,
            Err(ProxyError::NoAvailableAccount)
        ));

        seed(&pool, &["A"]).await;
        pool.mark_invalid("A").await;
        assert!(matches!(
            pool.select().await,
            Err(ProxyError::NoAvailableAccount)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_auto_recovers_after_five_minutes() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A"]).await;

        pool.record_error("A", true).await;
        assert_eq!(pool.status_of("A").await, Some(AccountStatus::Cooldown));
        assert!(matches!(
            pool.select().await,
            Err(ProxyError::NoAvailableAccount)
        ));

        tokio::time::sleep(COOLDOWN_RECOVERY + std::time::Duration::from_secs(1)).await;
        assert_eq!(pool.status_of("A").await, Some(AccountStatus::Active));
        assert_eq!(pool.select().await.unwrap().account_id, "A");
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_timer_does_not_override_invalidation() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A"]).await;

        pool.record_error("A", true).await;
        pool.mark_invalid("A").await;

        tokio::time::sleep(COOLDOWN_RECOVERY + std::time::Duration::from_secs(1)).await;
        assert_eq!(pool.status_of("A").await, Some(AccountStatus::Invalid));
    }

    #[tokio::test]
    async fn manual_recovery_moves_cooldown_to_active() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A", "B"]).await;
        pool.record_error("A", true).await;
        pool.record_error("B", true).await;

        assert!(pool.recover_cooldown("A").await);
        assert_eq!(pool.status_of("A").await, Some(AccountStatus::Active));
        assert_eq!(pool.recover_all_cooldowns().await, 1);
        assert_eq!(pool.status_of("B").await, Some(AccountStatus::Active));
    }

    #[tokio::test]
    async fn non_rate_limit_errors_only_count() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A"]).await;
        pool.record_error("A", false).await;
        let account = pool.account("A").await.unwrap();
        assert_eq!(account.error_count, 1);
        assert_eq!(account.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn shared_mode_rejects_mutations() {
        let mut config = Config::default();
        config.shared_accounts_file = Some("/tmp/accounts.json".into());
        let pool = AccountPool::new(&config, reqwest::Client::new());

        assert!(pool.add_account(test_account("A")).await.is_err());
        assert!(pool.set_disabled("A", true).await.is_err());
        assert!(pool.remove_account("A").await.is_err());
    }

    #[tokio::test]
    async fn snapshot_preserves_counters_and_cooldown() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A", "B"]).await;
        pool.select().await.unwrap();
        pool.record_error("A", true).await;

        // New generation reports A active again and drops B.
        let mut next = test_account("A");
        next.status = AccountStatus::Active;
        pool.apply_snapshot(vec![next]).await;

        let account = pool.account("A").await.unwrap();
        assert_eq!(account.request_count, 1);
        assert_eq!(account.error_count, 1);
        assert_eq!(account.status, AccountStatus::Cooldown);
        assert!(pool.account("B").await.is_none());
    }

    #[tokio::test]
    async fn disable_enable_cycle() {
        let pool = pool_with_policy(SelectionPolicy::RoundRobin);
        seed(&pool, &["A"]).await;
        pool.set_disabled("A", true).await.unwrap();
        assert_eq!(pool.status_of("A").await, Some(AccountStatus::Disabled));
        // Disable is not a cooldown; recover must not touch it.
        assert!(!pool.recover_cooldown("A").await);
        pool.set_disabled("A", false).await.unwrap();
        assert_eq!(pool.status_of("A").await, Some(AccountStatus::Active));
    }
}
