// 运维只读端点

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::core::models::REFRESH_BUFFER_MS;
use crate::state::AppState;

/// GET /status
pub async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.credentials.load().await;
    let total = store.accounts.len();
    let enabled = store.accounts.values().filter(|a| a.enabled).count();
    let valid = store
        .accounts
        .values()
        .filter(|a| a.enabled && !a.credentials.is_expired(REFRESH_BUFFER_MS))
        .count();

    Json(json!({
        "strategy": state.router.strategy(),
        "accounts": {
            "total": total,
            "enabled": enabled,
            "valid": valid,
        },
        "defaultAccountId": store.default_account_id,
    }))
}

/// GET /accounts 原样返回持久化账户库 (只读)
pub async fn handle_accounts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.credentials.load().await)
}

/// GET /health
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}
