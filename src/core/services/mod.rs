//! 核心服务层

pub mod account;
pub mod oauth;

pub use account::{resolve_account, CredentialStore};
pub use oauth::OAuthClient;
