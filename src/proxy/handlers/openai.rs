// OpenAI 兼容端点处理器

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::proxy::{endpoint, models};
use crate::state::AppState;

/// POST /v1/chat/completions
///
/// 每个请求依次经过: 解析 body, 选账户, 取凭证(必要时刷新), 转发上游,
/// 最后流式透传或整体缓冲。这一层不做重试: 单次上游失败原样交还调用方。
pub async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Response, ProxyError> {
    let payload: Value = serde_json::from_str(&body)
        .map_err(|e| ProxyError::InvalidRequest(format!("Invalid JSON body: {}", e)))?;

    let is_streaming = payload
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    debug!("收到 chat completion 请求, model: {}, stream: {}", model, is_streaming);

    // 1. 选账户。None 是正常结果: 没有任何可用账户时返回 401
    let store = state.credentials.load().await;
    let account_id = match state.router.select(&store) {
        Some(account) => account.id.clone(),
        None => {
            return Err(ProxyError::Auth(
                "No accounts configured. Run `qwen-proxy login` to add one.".to_string(),
            ))
        }
    };
    drop(store);

    // 2. 取凭证。过期在这里解决，handler 永远拿不到过期 Token。
    let credentials = state.credentials.get_valid_credentials(&account_id).await?;

    // 3. 解析上游端点并转发
    let base_url = endpoint::resolve_base_url(credentials.resource_url.as_deref());
    let target = format!("{}/chat/completions", base_url);
    let headers = endpoint::build_headers(&credentials, &base_url);

    let mut request = state.http.post(&target).headers(headers).body(body);
    if !is_streaming {
        request = request.timeout(std::time::Duration::from_secs(30));
    }
    let response = request
        .send()
        .await
        .map_err(|e| ProxyError::Network(format!("Failed to reach upstream: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response.text().await.unwrap_or_default();
        warn!(
            "上游返回 {} (model: {}, account: {}): {}",
            status.as_u16(),
            model,
            account_id,
            error_body
        );
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            body: error_body,
        });
    }

    // 4. 上游 2xx 即成功：记录使用统计（软负载信号，不影响请求结果）
    state.credentials.record_usage(&account_id).await;

    if is_streaming {
        // 字节级透传。SSE 帧完全由上游负责，这一层不缓冲、不重组。
        // 客户端断开时 Body 流被丢弃，reqwest 响应随之释放上游连接。
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .map_err(|e| ProxyError::Network(format!("Failed to build response: {}", e)));
    }

    // 非流式：完整缓冲后原样返回，保持上游的 Content-Length framing
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Network(format!("Failed to read upstream response: {}", e)))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .map_err(|e| ProxyError::Network(format!("Failed to build response: {}", e)))
}

/// GET /v1/models
pub async fn handle_list_models() -> impl IntoResponse {
    Json(json!({
        "object": "list",
        "data": models::list_models(),
    }))
}

/// GET /v1/models/:id
pub async fn handle_get_model(Path(id): Path<String>) -> Response {
    match models::get_model(&id) {
        Some(model) => Json(model).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Model not found" })),
        )
            .into_response(),
    }
}
