//! 统一错误类型
//! CredentialStore / OAuthClient 的错误在 HTTP 边界处转换为 `{"error": ...}` 响应

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// OAuth 交换失败（设备授权、轮询或刷新）
    #[error("{0}")]
    Auth(String),
    /// 上游要求放慢轮询。重试信号，不是失败。
    #[error("slow_down: polling too frequently")]
    SlowDown,
    /// 设备授权超过墙钟超时
    #[error("Device authorization timed out after {0}ms")]
    Timeout(u64),
    #[error("Account not found: {0}")]
    NotFound(String),
    #[error("Account is disabled: {0}")]
    Disabled(String),
    #[error("Credentials expired and no refresh token is available")]
    Expired,
    /// 上游返回非 2xx：状态码与响应体原样透传
    #[error("Upstream error {status}")]
    Upstream { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Upstream { status, body } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (
                    status,
                    [(header::CONTENT_TYPE, "application/json")],
                    body,
                )
                    .into_response()
            }
            other => {
                let status = match &other {
                    ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    ProxyError::Network(_) => StatusCode::BAD_GATEWAY,
                    ProxyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    // 账户状态与 OAuth 的失败一律映射为 401
                    _ => StatusCode::UNAUTHORIZED,
                };
                (status, Json(json!({ "error": other.to_string() }))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_maps_to_401() {
        let response = ProxyError::Auth("token exchange failed".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_upstream_error_passes_status_through() {
        let response = ProxyError::Upstream {
            status: 418,
            body: r#"{"error":"teapot"}"#.to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_network_error_maps_to_502() {
        let response = ProxyError::Network("connect refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
