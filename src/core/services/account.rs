//! 凭证存储服务
//! 账户库的唯一事实来源："这个账户现在能不能用" 在这里裁决

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::models::{Account, AccountStore, Credentials, REFRESH_BUFFER_MS};
use crate::core::services::oauth::OAuthClient;
use crate::core::traits::StorageConfig;
use crate::error::{ProxyError, Result};

/// 账户查找：精确 id 优先，其次第一个同名账户
pub fn resolve_account<'a>(store: &'a AccountStore, key: &str) -> Option<&'a Account> {
    if let Some(account) = store.accounts.get(key) {
        return Some(account);
    }
    store.accounts.values().find(|a| a.name == key)
}

/// 凭证存储
pub struct CredentialStore {
    storage: Box<dyn StorageConfig>,
    oauth: OAuthClient,
    /// 整库读-改-写串行锁，避免并发写互相覆盖
    write_lock: Mutex<()>,
    /// 单飞刷新锁：每个账户同一时刻最多一个刷新在途
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialStore {
    pub fn new(storage: Box<dyn StorageConfig>, oauth: OAuthClient) -> Self {
        Self {
            storage,
            oauth,
            write_lock: Mutex::new(()),
            refresh_locks: DashMap::new(),
        }
    }

    /// 加载持久化账户库
    /// 文件缺失或损坏时返回空库：代理必须能启动（可用性优先于严格性）
    pub async fn load(&self) -> AccountStore {
        let path = self.storage.accounts_path();
        if !path.exists() {
            return AccountStore::default();
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(store) => store,
                Err(e) => {
                    tracing::warn!("账户文件损坏，按空库处理: {}", e);
                    AccountStore::default()
                }
            },
            Err(e) => {
                tracing::warn!("读取账户文件失败，按空库处理: {}", e);
                AccountStore::default()
            }
        }
    }

    /// 保存账户库（原子写入：临时文件 + 重命名；0600 权限，文件里有 bearer token）
    pub async fn save(&self, store: &AccountStore) -> Result<()> {
        let path = self.storage.accounts_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProxyError::Storage(format!("创建数据目录失败: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(store)
            .map_err(|e| ProxyError::Storage(format!("序列化账户库失败: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| ProxyError::Storage(format!("写入临时文件失败: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| ProxyError::Storage(format!("设置文件权限失败: {}", e)))?;
        }

        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| ProxyError::Storage(format!("重命名文件失败: {}", e)))?;

        Ok(())
    }

    /// 整库读-改-写（写锁串行化）
    async fn update_store<F, T>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut AccountStore) -> Result<T>,
    {
        let _guard = self.write_lock.lock().await;
        let mut store = self.load().await;
        let out = mutate(&mut store)?;
        self.save(&store).await?;
        Ok(out)
    }

    /// 取得可用凭证：凭证新鲜度在此唯一裁决
    /// 调用方拿到的要么是未过期的凭证, 要么是错误, 绝不会是过期 Token
    pub async fn get_valid_credentials(&self, account_id: &str) -> Result<Credentials> {
        let store = self.load().await;
        let account = store
            .accounts
            .get(account_id)
            .ok_or_else(|| ProxyError::NotFound(account_id.to_string()))?;

        if !account.enabled {
            return Err(ProxyError::Disabled(account_id.to_string()));
        }
        if !account.credentials.is_expired(REFRESH_BUFFER_MS) {
            return Ok(account.credentials.clone());
        }

        self.refresh_account(account_id).await
    }

    /// 单飞刷新：同一账户的并发调用共享同一次在途刷新
    async fn refresh_account(&self, account_id: &str) -> Result<Credentials> {
        let lock = self
            .refresh_locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // 拿到锁后重读：前一个持锁者可能已写回新凭证
        let store = self.load().await;
        let account = store
            .accounts
            .get(account_id)
            .ok_or_else(|| ProxyError::NotFound(account_id.to_string()))?;
        if !account.enabled {
            return Err(ProxyError::Disabled(account_id.to_string()));
        }
        if !account.credentials.is_expired(REFRESH_BUFFER_MS) {
            return Ok(account.credentials.clone());
        }

        let refresh_token = account
            .credentials
            .refresh_token
            .clone()
            .ok_or(ProxyError::Expired)?;
        let previous_resource_url = account.credentials.resource_url.clone();

        let token = self.oauth.refresh_access_token(&refresh_token).await?;
        let mut credentials = token.into_credentials();
        // 上游未轮换 refresh_token / 未重申 resource_url 时保留旧值
        if credentials.refresh_token.is_none() {
            credentials.refresh_token = Some(refresh_token);
        }
        if credentials.resource_url.is_none() {
            credentials.resource_url = previous_resource_url;
        }

        let persisted = credentials.clone();
        self.update_store(move |store| {
            let account = store
                .accounts
                .get_mut(account_id)
                .ok_or_else(|| ProxyError::NotFound(account_id.to_string()))?;
            account.credentials = persisted;
            Ok(())
        })
        .await?;

        Ok(credentials)
    }

    /// 记录使用统计。尽力而为：失败只记日志，统计不是正确性数据。
    pub async fn record_usage(&self, account_id: &str) {
        let result = self
            .update_store(|store| {
                let account = store
                    .accounts
                    .get_mut(account_id)
                    .ok_or_else(|| ProxyError::NotFound(account_id.to_string()))?;
                account.request_count += 1;
                account.last_used = Some(chrono::Utc::now().timestamp_millis());
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!("记录账户 {} 使用统计失败: {}", account_id, e);
        }
    }

    /// 添加账户。第一个账户自动成为默认账户。
    pub async fn add_account(&self, name: String, credentials: Credentials) -> Result<Account> {
        let account = Account::new(name, credentials);
        let inserted = account.clone();
        self.update_store(move |store| {
            if store.default_account_id.is_none() {
                store.default_account_id = Some(inserted.id.clone());
            }
            store.accounts.insert(inserted.id.clone(), inserted);
            Ok(())
        })
        .await?;
        Ok(account)
    }

    /// 删除账户（按 id 或名称）。删除默认账户时重新指派默认（任选剩余之一）。
    pub async fn remove_account(&self, key: &str) -> Result<()> {
        self.update_store(|store| {
            let id = resolve_account(store, key)
                .map(|a| a.id.clone())
                .ok_or_else(|| ProxyError::NotFound(key.to_string()))?;
            store.accounts.remove(&id);
            if store.default_account_id.as_deref() == Some(id.as_str()) {
                store.default_account_id = store.accounts.keys().next().cloned();
            }
            Ok(())
        })
        .await
    }

    /// 启用/禁用账户（按 id 或名称）
    pub async fn set_enabled(&self, key: &str, enabled: bool) -> Result<()> {
        self.update_store(|store| {
            let id = resolve_account(store, key)
                .map(|a| a.id.clone())
                .ok_or_else(|| ProxyError::NotFound(key.to_string()))?;
            if let Some(account) = store.accounts.get_mut(&id) {
                account.enabled = enabled;
            }
            Ok(())
        })
        .await
    }

    /// 重命名账户（按 id 或名称）
    pub async fn rename_account(&self, key: &str, new_name: String) -> Result<()> {
        self.update_store(|store| {
            let id = resolve_account(store, key)
                .map(|a| a.id.clone())
                .ok_or_else(|| ProxyError::NotFound(key.to_string()))?;
            if let Some(account) = store.accounts.get_mut(&id) {
                account.name = new_name;
            }
            Ok(())
        })
        .await
    }

    /// 设置默认账户（按 id 或名称）
    pub async fn set_default(&self, key: &str) -> Result<()> {
        self.update_store(|store| {
            let id = resolve_account(store, key)
                .map(|a| a.id.clone())
                .ok_or_else(|| ProxyError::NotFound(key.to_string()))?;
            store.default_account_id = Some(id);
            Ok(())
        })
        .await
    }
}
