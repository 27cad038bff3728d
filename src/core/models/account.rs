//! 账户数据模型
//! 持久化 JSON 使用 camelCase 字段名（与账户文件的外部契约保持一致）

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 刷新缓冲：在硬过期前提前这么多毫秒触发刷新，避免在途请求撞上过期
pub const REFRESH_BUFFER_MS: i64 = 30_000;

/// OAuth 凭证
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    /// 过期时间 (epoch 毫秒)。缺失视为已过期，使用前必须刷新。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credentials {
    /// 是否已过期（含缓冲）
    pub fn is_expired(&self, buffer_ms: i64) -> bool {
        match self.expiry_date {
            Some(expiry) => chrono::Utc::now().timestamp_millis() > expiry - buffer_ms,
            None => true,
        }
    }
}

/// 单个账户，由 CredentialStore 独占管理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    /// 展示名。不保证唯一，可作为次级查找键。
    pub name: String,
    pub credentials: Credentials,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: i64,
    #[serde(default)]
    pub last_used: Option<i64>,
    #[serde(default)]
    pub request_count: u64,
}

fn default_enabled() -> bool {
    true
}

impl Account {
    pub fn new(name: String, credentials: Credentials) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            credentials,
            enabled: true,
            created_at: chrono::Utc::now().timestamp_millis(),
            last_used: None,
            request_count: 0,
        }
    }
}

/// 持久化根结构
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStore {
    #[serde(default)]
    pub accounts: HashMap<String, Account>,
    /// 非空库中必须指向一个存在的账户；删除默认账户时重新指派
    #[serde(default)]
    pub default_account_id: Option<String>,
}
