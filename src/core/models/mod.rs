//! 核心数据模型

mod account;
mod config;

pub use account::{Account, AccountStore, Credentials, REFRESH_BUFFER_MS};
pub use config::{AppConfig, RoutingStrategy};
