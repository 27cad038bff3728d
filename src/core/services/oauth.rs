//! OAuth 服务
//! Qwen 设备授权流程 (RFC 8628) + PKCE S256 (RFC 7636)，以及 refresh_token 交换

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::core::models::Credentials;
use crate::error::{ProxyError, Result};

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// 设备授权墙钟超时 (5 分钟)
pub const DEVICE_FLOW_TIMEOUT_MS: u64 = 300_000;
/// slow_down 退避的间隔上限
const MAX_POLL_INTERVAL_MS: u64 = 10_000;

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// OAuth 端点配置
/// 部署上是固定的公共客户端；测试可指向本地 mock 服务
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub device_code_url: String,
    pub token_url: String,
    pub client_id: String,
    pub scope: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            device_code_url: "https://chat.qwen.ai/api/v1/oauth2/device/code".to_string(),
            token_url: "https://chat.qwen.ai/api/v1/oauth2/token".to_string(),
            client_id: "f0304373b74a44d2b584a3fb70ca9e56".to_string(),
            scope: "openid profile email model.completion".to_string(),
        }
    }
}

/// PKCE verifier/challenge 对
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    /// 生成新的 PKCE 对 (S256)
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

/// 设备授权响应
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    #[serde(default)]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: String,
    /// 上游建议的轮询间隔（秒）
    #[serde(default)]
    pub interval: Option<u64>,
}

impl DeviceAuthorization {
    /// 用户需要打开的验证地址
    pub fn verification_url(&self) -> &str {
        if self.verification_uri_complete.is_empty() {
            &self.verification_uri
        } else {
            &self.verification_uri_complete
        }
    }
}

/// Token 端点响应
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub resource_url: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// 转换为凭证 (expiry_date = now + expires_in*1000)
    pub fn into_credentials(self) -> Credentials {
        let now = chrono::Utc::now().timestamp_millis();
        Credentials {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            resource_url: self.resource_url,
            expiry_date: Some(now + self.expires_in * 1000),
            scope: self.scope,
        }
    }
}

/// 单次轮询结果。pending 是正常状态，不是错误。
#[derive(Debug)]
pub enum DevicePoll {
    Pending,
    Ready(TokenResponse),
}

/// slow_down 退避：间隔 x1.5，上限 10 秒
fn next_poll_interval(current_ms: u64) -> u64 {
    ((current_ms as f64 * 1.5) as u64).min(MAX_POLL_INTERVAL_MS)
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ProxyError::Network(format!("创建 HTTP 客户端失败: {}", e)))
}

/// OAuth 客户端
pub struct OAuthClient {
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new() -> Self {
        Self::with_config(OAuthConfig::default())
    }

    pub fn with_config(config: OAuthConfig) -> Self {
        Self { config }
    }

    /// 请求设备码
    pub async fn request_device_authorization(
        &self,
        challenge: &str,
    ) -> Result<DeviceAuthorization> {
        let client = http_client()?;
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", self.config.scope.as_str()),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
        ];

        let response = client
            .post(&self.config.device_code_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProxyError::Network(format!("设备码请求失败: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::Network(format!("读取设备码响应失败: {}", e)))?;

        if !status.is_success() {
            return Err(ProxyError::Auth(format!(
                "Device authorization failed (HTTP {}): {}",
                status.as_u16(),
                body
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ProxyError::Auth(format!("设备码响应解析失败: {}", e)))?;
        let has_device_code = value.get("device_code").and_then(|v| v.as_str()).is_some();
        let has_user_code = value.get("user_code").and_then(|v| v.as_str()).is_some();
        if !has_device_code || !has_user_code {
            return Err(ProxyError::Auth(format!(
                "Device authorization response missing device_code/user_code: {}",
                body
            )));
        }

        serde_json::from_value(value)
            .map_err(|e| ProxyError::Auth(format!("设备码响应解析失败: {}", e)))
    }

    /// 轮询一次设备 Token
    pub async fn poll_device_token(
        &self,
        device_code: &str,
        verifier: &str,
    ) -> Result<DevicePoll> {
        let client = http_client()?;
        let params = [
            ("grant_type", DEVICE_GRANT_TYPE),
            ("client_id", self.config.client_id.as_str()),
            ("device_code", device_code),
            ("code_verifier", verifier),
        ];

        let response = client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProxyError::Network(format!("Token 轮询请求失败: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let token = response
                .json::<TokenResponse>()
                .await
                .map_err(|e| ProxyError::Auth(format!("Token 响应解析失败: {}", e)))?;
            return Ok(DevicePoll::Ready(token));
        }

        let body = response.text().await.unwrap_or_default();
        let error_code = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.as_str())
                    .map(|s| s.to_string())
            });

        match (status.as_u16(), error_code.as_deref()) {
            (400, Some("authorization_pending")) => Ok(DevicePoll::Pending),
            (429, Some("slow_down")) => Err(ProxyError::SlowDown),
            _ => Err(ProxyError::Auth(format!(
                "Device token poll failed (HTTP {}): {}",
                status.as_u16(),
                body
            ))),
        }
    }

    /// 完整设备授权流程
    ///
    /// 取得设备码后同步回调 `on_verification_url` 恰好一次（由调用方展示/打开地址），
    /// 然后进入轮询循环：pending 继续等待；slow_down 把间隔乘 1.5（上限 10 秒）后继续；
    /// 超过 `timeout_ms` 仍未拿到 Token 则失败。
    pub async fn perform_device_auth_flow<F>(
        &self,
        on_verification_url: F,
        poll_interval_ms: u64,
        timeout_ms: u64,
    ) -> Result<Credentials>
    where
        F: FnOnce(&str, &str),
    {
        let pkce = PkceChallenge::generate();
        let device = self.request_device_authorization(&pkce.challenge).await?;

        on_verification_url(device.verification_url(), &device.user_code);

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        let mut interval_ms = device
            .interval
            .map(|secs| secs * 1000)
            .unwrap_or(poll_interval_ms);

        loop {
            if tokio::time::Instant::now() + Duration::from_millis(interval_ms) > deadline {
                return Err(ProxyError::Timeout(timeout_ms));
            }
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;

            match self.poll_device_token(&device.device_code, &pkce.verifier).await {
                Ok(DevicePoll::Ready(token)) => {
                    tracing::info!("设备授权完成，有效期 {} 秒", token.expires_in);
                    return Ok(token.into_credentials());
                }
                Ok(DevicePoll::Pending) => continue,
                Err(ProxyError::SlowDown) => {
                    interval_ms = next_poll_interval(interval_ms);
                    tracing::debug!("收到 slow_down，下次轮询间隔 {}ms", interval_ms);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 使用 refresh_token 刷新 access_token
    ///
    /// 上游可能不轮换 refresh_token：响应缺失时由调用方保留旧值。
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let client = http_client()?;
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        tracing::info!("正在刷新 Token...");

        let response = client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProxyError::Network(format!("刷新请求失败: {}", e)))?;

        if response.status().is_success() {
            let token = response
                .json::<TokenResponse>()
                .await
                .map_err(|e| ProxyError::Auth(format!("刷新数据解析失败: {}", e)))?;
            tracing::info!("Token 刷新成功！有效期: {} 秒", token.expires_in);
            Ok(token)
        } else {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            Err(ProxyError::Auth(format!(
                "刷新失败 (HTTP {}): {}",
                status, error_text
            )))
        }
    }
}

impl Default for OAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pkce_generation() {
        let pkce = PkceChallenge::generate();
        // 32 字节 base64url 无填充 => 43 字符
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge.len(), 43);
        assert_ne!(pkce.verifier, pkce.challenge);
        assert!(!pkce.verifier.contains('='));

        // challenge 必须是 verifier 的 SHA-256
        let mut hasher = Sha256::new();
        hasher.update(pkce.verifier.as_bytes());
        assert_eq!(pkce.challenge, URL_SAFE_NO_PAD.encode(hasher.finalize()));
    }

    #[test]
    fn test_pkce_pairs_are_unique() {
        let a = PkceChallenge::generate();
        let b = PkceChallenge::generate();
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn test_next_poll_interval_backoff_and_cap() {
        assert_eq!(next_poll_interval(2_000), 3_000);
        assert_eq!(next_poll_interval(3_000), 4_500);
        assert_eq!(next_poll_interval(9_000), 10_000);
        assert_eq!(next_poll_interval(10_000), 10_000);
    }

    #[test]
    fn test_token_response_into_credentials() {
        let token = TokenResponse {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("rt".to_string()),
            resource_url: Some("dashscope.aliyuncs.com".to_string()),
            expires_in: 3600,
            scope: Some("openid".to_string()),
        };
        let before = chrono::Utc::now().timestamp_millis();
        let credentials = token.into_credentials();
        let expiry = credentials.expiry_date.unwrap();
        assert!(expiry >= before + 3_600_000);
        assert!(expiry <= chrono::Utc::now().timestamp_millis() + 3_600_000);
        assert_eq!(credentials.refresh_token.as_deref(), Some("rt"));
    }

    struct MockOAuth {
        poll_count: AtomicUsize,
        /// 前多少次轮询返回 pending
        pending_polls: usize,
        /// 第一次轮询是否返回 slow_down
        slow_down_first: bool,
    }

    async fn mock_device_code() -> impl IntoResponse {
        Json(json!({
            "device_code": "dev-123",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://example.com/activate",
            "verification_uri_complete": "https://example.com/activate?user_code=ABCD-EFGH",
        }))
    }

    async fn mock_token(State(state): State<Arc<MockOAuth>>) -> axum::response::Response {
        let n = state.poll_count.fetch_add(1, Ordering::SeqCst);
        if state.slow_down_first && n == 0 {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": "slow_down"})),
            )
                .into_response();
        }
        if n < state.pending_polls {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "authorization_pending"})),
            )
                .into_response();
        }
        Json(json!({
            "access_token": "issued-token",
            "token_type": "Bearer",
            "refresh_token": "issued-refresh",
            "resource_url": "dashscope.aliyuncs.com",
            "expires_in": 3600,
            "scope": "openid",
        }))
        .into_response()
    }

    async fn spawn_mock_oauth(mock: Arc<MockOAuth>) -> SocketAddr {
        let app = Router::new()
            .route("/device/code", post(mock_device_code))
            .route("/token", post(mock_token))
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr) -> OAuthClient {
        OAuthClient::with_config(OAuthConfig {
            device_code_url: format!("http://{}/device/code", addr),
            token_url: format!("http://{}/token", addr),
            client_id: "test-client".to_string(),
            scope: "openid".to_string(),
        })
    }

    #[tokio::test]
    async fn test_device_flow_pending_then_success() {
        let mock = Arc::new(MockOAuth {
            poll_count: AtomicUsize::new(0),
            pending_polls: 2,
            slow_down_first: false,
        });
        let addr = spawn_mock_oauth(mock.clone()).await;
        let client = client_for(addr);

        let url_calls = Arc::new(AtomicUsize::new(0));
        let url_calls_in_flow = url_calls.clone();
        let start = std::time::Instant::now();
        let credentials = client
            .perform_device_auth_flow(
                move |url, user_code| {
                    assert!(url.contains("user_code=ABCD-EFGH"));
                    assert_eq!(user_code, "ABCD-EFGH");
                    url_calls_in_flow.fetch_add(1, Ordering::SeqCst);
                },
                20,
                10_000,
            )
            .await
            .unwrap();

        // 回调恰好一次；两次 pending 意味着至少经过 2x 轮询间隔
        assert_eq!(url_calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(credentials.access_token, "issued-token");
        assert!(!credentials.is_expired(30_000));
        assert_eq!(mock.poll_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_device_flow_slow_down_increases_interval() {
        let mock = Arc::new(MockOAuth {
            poll_count: AtomicUsize::new(0),
            pending_polls: 0,
            slow_down_first: true,
        });
        let addr = spawn_mock_oauth(mock.clone()).await;
        let client = client_for(addr);

        let start = std::time::Instant::now();
        let credentials = client
            .perform_device_auth_flow(|_, _| {}, 20, 10_000)
            .await
            .unwrap();

        // slow_down 之后间隔变为 30ms：20 + 30 = 至少 50ms
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(credentials.access_token, "issued-token");
        assert_eq!(mock.poll_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_device_flow_times_out() {
        let mock = Arc::new(MockOAuth {
            poll_count: AtomicUsize::new(0),
            pending_polls: usize::MAX,
            slow_down_first: false,
        });
        let addr = spawn_mock_oauth(mock).await;
        let client = client_for(addr);

        let result = client.perform_device_auth_flow(|_, _| {}, 30, 100).await;
        match result {
            Err(ProxyError::Timeout(ms)) => assert_eq!(ms, 100),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_refresh_access_token_roundtrip() {
        let mock = Arc::new(MockOAuth {
            poll_count: AtomicUsize::new(0),
            pending_polls: 0,
            slow_down_first: false,
        });
        let addr = spawn_mock_oauth(mock).await;
        let client = client_for(addr);

        let token = client.refresh_access_token("old-refresh").await.unwrap();
        assert_eq!(token.access_token, "issued-token");
        assert_eq!(token.expires_in, 3600);
    }
}
