//! 应用配置模型

use serde::{Deserialize, Serialize};

/// 账户路由策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    /// 始终使用默认账户
    #[default]
    Default,
    /// 在启用且有效的账户间按 LRU 轮换
    #[serde(alias = "load-balance")]
    RoundRobin,
}

impl std::str::FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "round-robin" | "load-balance" => Ok(Self::RoundRobin),
            other => Err(format!(
                "unknown routing strategy '{}' (expected: default | round-robin | load-balance)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub routing_strategy: RoutingStrategy,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            routing_strategy: RoutingStrategy::default(),
        }
    }
}
