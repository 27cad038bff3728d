//! 核心模块
//! 凭证生命周期与账户管理的业务逻辑

pub mod models;
pub mod services;
pub mod storage;
pub mod traits;

// 重导出常用类型
pub use traits::{DefaultStorageConfig, StorageConfig};
