//! 配置存储服务

use crate::core::models::AppConfig;
use crate::core::traits::StorageConfig;
use crate::error::{ProxyError, Result};

/// 配置存储服务
pub struct ConfigStorage;

impl ConfigStorage {
    /// 加载应用配置；配置文件不存在时写入并返回默认配置
    pub async fn load<S: StorageConfig + ?Sized>(storage: &S) -> Result<AppConfig> {
        let config_path = storage.config_path();

        if !config_path.exists() {
            let default_config = AppConfig::default();
            Self::save(storage, &default_config).await?;
            return Ok(default_config);
        }

        let content = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| ProxyError::Storage(format!("读取配置文件失败: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| ProxyError::Storage(format!("解析配置文件失败: {}", e)))
    }

    /// 保存应用配置
    pub async fn save<S: StorageConfig + ?Sized>(storage: &S, config: &AppConfig) -> Result<()> {
        let config_path = storage.config_path();

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProxyError::Storage(format!("创建配置目录失败: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| ProxyError::Storage(format!("序列化配置失败: {}", e)))?;

        // 原子写入：先写入临时文件，再重命名
        let temp_path = config_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| ProxyError::Storage(format!("写入临时配置文件失败: {}", e)))?;

        tokio::fs::rename(&temp_path, &config_path)
            .await
            .map_err(|e| ProxyError::Storage(format!("重命名配置文件失败: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::RoutingStrategy;
    use crate::core::traits::DefaultStorageConfig;

    #[tokio::test]
    async fn test_load_writes_defaults_when_missing() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DefaultStorageConfig::with_path(temp.path().to_path_buf()).unwrap();

        let config = ConfigStorage::load(&storage).await.unwrap();
        assert_eq!(config.port, 8080);
        assert!(storage.config_path().exists());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DefaultStorageConfig::with_path(temp.path().to_path_buf()).unwrap();

        let config = AppConfig {
            host: "0.0.0.0".to_string(),
            port: 9000,
            routing_strategy: RoutingStrategy::RoundRobin,
        };
        ConfigStorage::save(&storage, &config).await.unwrap();

        let loaded = ConfigStorage::load(&storage).await.unwrap();
        assert_eq!(loaded.host, "0.0.0.0");
        assert_eq!(loaded.port, 9000);
        assert_eq!(loaded.routing_strategy, RoutingStrategy::RoundRobin);
    }
}
