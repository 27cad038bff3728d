use crate::core::models::AppConfig;
use crate::core::services::{CredentialStore, OAuthClient};
use crate::core::traits::{DefaultStorageConfig, StorageConfig};
use crate::error::{ProxyError, Result};
use crate::proxy::AccountRouter;
use std::path::PathBuf;

/// Web 应用状态
pub struct AppState {
    pub config: AppConfig,
    pub credentials: CredentialStore,
    pub router: AccountRouter,
    /// 上游转发共用客户端。只设连接超时：流式响应不能吃整体超时，
    /// 非流式调用在发送时单独加 30s。
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let storage = DefaultStorageConfig::new()?;
        Self::with_storage(config, Box::new(storage))
    }

    pub fn with_data_dir(config: AppConfig, data_dir: PathBuf) -> Result<Self> {
        let storage = DefaultStorageConfig::with_path(data_dir)?;
        Self::with_storage(config, Box::new(storage))
    }

    pub fn with_storage(config: AppConfig, storage: Box<dyn StorageConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ProxyError::Network(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            router: AccountRouter::new(config.routing_strategy),
            credentials: CredentialStore::new(storage, OAuthClient::new()),
            config,
            http,
        })
    }
}
