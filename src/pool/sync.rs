//! Shared-file synchronizer: one-way import of the external accounts file
//! into the pool, debounced by file mtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{SHARED_SYNC_INTERVAL, SHARED_SYNC_READ_TIMEOUT};
use crate::error::{AppError, AppResult};
use crate::pool::account::SharedAccountRecord;
use crate::pool::pool::AccountPool;

struct SyncState {
    last_mtime: Option<SystemTime>,
    missing_warned: bool,
}

pub struct SharedFileSync {
    path: PathBuf,
    // Serializes sync passes; a caller queued behind an in-flight pass
    // re-checks the mtime and no-ops, so it observes that pass's result.
    state: Mutex<SyncState>,
}

impl SharedFileSync {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(SyncState {
                last_mtime: None,
                missing_warned: false,
            }),
        }
    }

    /// Runs one sync pass. Returns `true` when a new snapshot was swapped in.
    pub async fn sync(&self, pool: &AccountPool, force: bool) -> AppResult<bool> {
        let mut state = self.state.lock().await;

        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !state.missing_warned {
                    warn!(
                        "[Sync] shared accounts file missing, treating as empty: {}",
                        self.path.display()
                    );
                    state.missing_warned = true;
                }
                let had_accounts = !pool.ids().await.is_empty();
                if had_accounts {
                    pool.apply_snapshot(Vec::new()).await;
                }
                state.last_mtime = None;
                return Ok(had_accounts);
            }
            Err(e) => return Err(e.into()),
        };
        if state.missing_warned {
            info!("[Sync] shared accounts file reappeared: {}", self.path.display());
            state.missing_warned = false;
        }

        let mtime = metadata.modified().ok();
        if !force {
            if let (Some(current), Some(seen)) = (mtime, state.last_mtime) {
                if current <= seen {
                    return Ok(false);
                }
            }
        }

        let raw = tokio::time::timeout(
            SHARED_SYNC_READ_TIMEOUT,
            tokio::fs::read_to_string(&self.path),
        )
        .await
        .map_err(|_| {
            AppError::Config(format!(
                "timed out reading shared accounts file {}",
                self.path.display()
            ))
        })??;

        let records: Vec<SharedAccountRecord> = serde_json::from_str(&raw).map_err(|e| {
            AppError::Config(format!(
                "shared accounts file is not a JSON array of accounts: {}",
                e
            ))
        })?;

        let mut accounts = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match record.into_account(index) {
                Some(account) => {
                    if !account.credentials.refresh_fields_present() {
                        warn!(
                            "[Sync] account {} is missing client credentials for IDC refresh",
                            account.id
                        );
                    }
                    accounts.push(account);
                }
                None => warn!(
                    "[Sync] skipping record #{} without a usable refresh token",
                    index + 1
                ),
            }
        }

        let imported = accounts.len();
        pool.apply_snapshot(accounts).await;
        state.last_mtime = mtime;
        debug!("[Sync] imported {} account(s) from shared file", imported);
        Ok(true)
    }

    /// Background poller. Failures are logged and never block request
    /// handling; readers always observe a complete snapshot.
    pub fn spawn_timer(
        self: Arc<Self>,
        pool: Arc<AccountPool>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SHARED_SYNC_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("[Sync] timer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sync(&pool, false).await {
                            warn!("[Sync] periodic sync failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pool::account::AccountStatus;
    use serde_json::json;
    use std::io::Write;

    fn shared_pool(path: &std::path::Path) -> Arc<AccountPool> {
        let mut config = Config::default();
        config.shared_accounts_file = Some(path.to_path_buf());
        AccountPool::new(&config, reqwest::Client::new())
    }

    fn write_accounts(path: &std::path::Path, value: &serde_json::Value) {
        let mut file = std::fs::File::create(path).expect("create accounts file");
        file.write_all(value.to_string().as_bytes()).expect("write accounts");
        file.sync_all().ok();
    }

    #[tokio::test]
    async fn initial_load_imports_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        write_accounts(
            &path,
            &json!([
                {"id": "a1", "email": "a@test", "refreshToken": "rt-a"},
                {"id": "a2", "refresh_token": "rt-b", "provider": "identity center",
                 "client_id": "ci", "client_secret": "cs", "status": "冷却"}
            ]),
        );

        let pool = shared_pool(&path);
        let sync = SharedFileSync::new(path);
        assert!(sync.sync(&pool, false).await.unwrap());

        assert_eq!(pool.ids().await, vec!["a1", "a2"]);
        assert_eq!(pool.status_of("a2").await, Some(AccountStatus::Cooldown));
        let a2 = pool.account("a2").await.unwrap();
        assert_eq!(
            a2.credentials.auth_method,
            crate::pool::account::AuthMethod::Idc
        );
    }

    #[tokio::test]
    async fn unchanged_mtime_is_debounced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        write_accounts(&path, &json!([{"id": "a1", "refreshToken": "rt"}]));

        let pool = shared_pool(&path);
        let sync = SharedFileSync::new(path);
        assert!(sync.sync(&pool, false).await.unwrap());
        assert!(!sync.sync(&pool, false).await.unwrap());
        // A forced pass re-reads regardless of mtime.
        assert!(sync.sync(&pool, true).await.unwrap());
    }

    #[tokio::test]
    async fn reload_preserves_runtime_state_and_drops_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        write_accounts(
            &path,
            &json!([
                {"id": "keep", "refreshToken": "rt-1"},
                {"id": "drop", "refreshToken": "rt-2"}
            ]),
        );

        let pool = shared_pool(&path);
        let sync = SharedFileSync::new(path.clone());
        sync.sync(&pool, true).await.unwrap();

        pool.select().await.unwrap();
        pool.record_error("keep", true).await;

        write_accounts(
            &path,
            &json!([{"id": "keep", "refreshToken": "rt-1", "status": "active"}]),
        );
        sync.sync(&pool, true).await.unwrap();

        let kept = pool.account("keep").await.unwrap();
        assert_eq!(kept.request_count, 1);
        assert_eq!(kept.error_count, 1);
        assert_eq!(kept.status, AccountStatus::Cooldown);
        assert!(pool.account("drop").await.is_none());
    }

    #[tokio::test]
    async fn missing_file_behaves_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        write_accounts(&path, &json!([{"id": "a1", "refreshToken": "rt"}]));

        let pool = shared_pool(&path);
        let sync = SharedFileSync::new(path.clone());
        sync.sync(&pool, true).await.unwrap();
        assert_eq!(pool.ids().await.len(), 1);

        std::fs::remove_file(&path).unwrap();
        sync.sync(&pool, false).await.unwrap();
        assert!(pool.ids().await.is_empty());

        // Second pass with the file still missing is a quiet no-op.
        assert!(!sync.sync(&pool, false).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(&path, "{\"not\": \"an array\"}").unwrap();

        let pool = shared_pool(&path);
        let sync = SharedFileSync::new(path);
        assert!(matches!(
            sync.sync(&pool, true).await,
            Err(AppError::Config(_))
        ));
        assert!(pool.ids().await.is_empty());
    }

    #[tokio::test]
    async fn records_without_tokens_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        write_accounts(
            &path,
            &json!([
                {"id": "good", "refreshToken": "rt"},
                {"id": "bad", "email": "no-token@test"}
            ]),
        );

        let pool = shared_pool(&path);
        let sync = SharedFileSync::new(path);
        sync.sync(&pool, true).await.unwrap();
        assert_eq!(pool.ids().await, vec!["good"]);
    }
}
