//! 上游端点解析
//! 把 OAuth 授予的 resource_url 映射到具体 API 基址，并构造上游请求头

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::core::models::Credentials;

/// Portal 端点
pub const PORTAL_BASE_URL: &str = "https://portal.qwen.ai/v1";
/// 国际区端点
pub const INTERNATIONAL_BASE_URL: &str = "https://dashscope-intl.aliyuncs.com/compatible-mode/v1";
/// 默认区端点
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

const PORTAL_HOST: &str = "portal.qwen.ai";
const INTERNATIONAL_MARKER: &str = "dashscope-intl";
const DEFAULT_MARKER: &str = "dashscope";

/// 固定 User-Agent。默认区上游用它归因 OAuth 流量，不能改动。
const DASHSCOPE_USER_AGENT: &str =
    concat!("qwen-proxy/", env!("CARGO_PKG_VERSION"), " (cli; linux)");

/// 把 resource_url 解析为上游基址。总函数: 任何输入都有结果, 未识别时落回默认区。
pub fn resolve_base_url(resource_url: Option<&str>) -> String {
    let normalized = resource_url
        .unwrap_or("")
        .trim()
        .trim_end_matches('/')
        .to_lowercase();

    if normalized.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }
    if normalized.contains(PORTAL_HOST) {
        return PORTAL_BASE_URL.to_string();
    }
    if normalized.contains(INTERNATIONAL_MARKER) {
        return INTERNATIONAL_BASE_URL.to_string();
    }
    if normalized.contains(DEFAULT_MARKER) {
        return DEFAULT_BASE_URL.to_string();
    }
    // 自建/替代端点：合法的绝对 http(s) URL 原样使用，按需补 /v1
    if normalized.starts_with("http://") || normalized.starts_with("https://") {
        if url::Url::parse(&normalized).is_ok() {
            if normalized.ends_with("/v1") {
                return normalized;
            }
            return format!("{}/v1", normalized);
        }
    }
    DEFAULT_BASE_URL.to_string()
}

/// 构造上游请求头
/// 默认区之外只带 Authorization 与 Content-Type；默认区还要三个归因头。
pub fn build_headers(credentials: &Credentials, base_url: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let auth = format!("{} {}", credentials.token_type, credentials.access_token);
    match HeaderValue::from_str(&auth) {
        Ok(value) => {
            headers.insert(header::AUTHORIZATION, value);
        }
        Err(e) => {
            // 坏 Token 会在上游得到 401 并原样透传
            tracing::warn!("Authorization 头构造失败: {}", e);
        }
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    if base_url == DEFAULT_BASE_URL {
        headers.insert(
            HeaderName::from_static("x-dashscope-cachecontrol"),
            HeaderValue::from_static("enable"),
        );
        headers.insert(
            HeaderName::from_static("x-dashscope-useragent"),
            HeaderValue::from_static(DASHSCOPE_USER_AGENT),
        );
        headers.insert(
            HeaderName::from_static("x-dashscope-authtype"),
            HeaderValue::from_static("qwen-oauth"),
        );
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            access_token: "secret".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            resource_url: None,
            expiry_date: Some(0),
            scope: None,
        }
    }

    #[test]
    fn test_resolve_portal_host() {
        assert_eq!(
            resolve_base_url(Some("https://portal.qwen.ai/")),
            PORTAL_BASE_URL
        );
        assert_eq!(resolve_base_url(Some("Portal.Qwen.AI")), PORTAL_BASE_URL);
    }

    #[test]
    fn test_resolve_international_marker() {
        assert_eq!(
            resolve_base_url(Some("dashscope-intl.aliyuncs.com")),
            INTERNATIONAL_BASE_URL
        );
    }

    #[test]
    fn test_resolve_default_marker() {
        assert_eq!(
            resolve_base_url(Some("dashscope.aliyuncs.com")),
            DEFAULT_BASE_URL
        );
    }

    #[test]
    fn test_resolve_custom_absolute_url() {
        assert_eq!(
            resolve_base_url(Some("https://llm.example.com")),
            "https://llm.example.com/v1"
        );
        // 已带 /v1 的不重复追加；末尾斜杠被剥掉
        assert_eq!(
            resolve_base_url(Some("https://llm.example.com/v1/")),
            "https://llm.example.com/v1"
        );
    }

    #[test]
    fn test_resolve_is_total() {
        // 任何输入都不会失败，只会落回默认区
        for input in [None, Some(""), Some("   "), Some("???"), Some("http://"), Some("ftp://x")] {
            let resolved = resolve_base_url(input);
            assert!(resolved.starts_with("http"), "input {:?} -> {}", input, resolved);
        }
        assert_eq!(resolve_base_url(Some("garbage")), DEFAULT_BASE_URL);
        assert_eq!(resolve_base_url(None), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_headers_always_carry_auth_and_content_type() {
        let headers = build_headers(&credentials(), PORTAL_BASE_URL);
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer secret");
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(headers.get("x-dashscope-authtype").is_none());
    }

    #[test]
    fn test_default_region_gets_vendor_headers() {
        let headers = build_headers(&credentials(), DEFAULT_BASE_URL);
        assert_eq!(headers.get("x-dashscope-cachecontrol").unwrap(), "enable");
        assert_eq!(headers.get("x-dashscope-authtype").unwrap(), "qwen-oauth");
        assert!(headers
            .get("x-dashscope-useragent")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("qwen-proxy/"));
    }
}
