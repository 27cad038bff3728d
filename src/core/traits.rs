//! 核心 trait 定义
//! 抽象数据目录与文件路径，测试时可指向临时目录

use std::path::PathBuf;

use crate::error::{ProxyError, Result};

/// 存储配置 trait
pub trait StorageConfig: Send + Sync {
    /// 获取数据目录路径
    fn data_dir(&self) -> PathBuf;

    /// 账户存储文件路径
    fn accounts_path(&self) -> PathBuf {
        self.data_dir().join("accounts.json")
    }

    /// 配置文件路径
    fn config_path(&self) -> PathBuf {
        self.data_dir().join("config.json")
    }
}

/// 默认存储配置 (使用 ~/.qwen-proxy/)
pub struct DefaultStorageConfig {
    data_dir: PathBuf,
}

impl DefaultStorageConfig {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ProxyError::Storage("无法获取用户主目录".to_string()))?;
        Self::with_path(home.join(".qwen-proxy"))
    }

    /// 从指定路径创建
    pub fn with_path(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| ProxyError::Storage(format!("创建数据目录失败: {}", e)))?;
        Ok(Self { data_dir })
    }
}

impl StorageConfig for DefaultStorageConfig {
    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}
