use crate::proxy::handlers::{meta, openai};
use crate::state::AppState;
use axum::http::{header, Method};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub mod common;

pub fn build_routes(state: Arc<AppState>) -> Router {
    // CORS：允许任意来源；预检放行 GET/POST/OPTIONS 与 Content-Type/Authorization
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        // OpenAI 兼容面
        .route("/v1/models", get(openai::handle_list_models))
        .route("/v1/models/:id", get(openai::handle_get_model))
        .route(
            "/v1/chat/completions",
            post(openai::handle_chat_completions),
        )
        // 运维面
        .route("/status", get(meta::handle_status))
        .route("/accounts", get(meta::handle_accounts))
        .route("/health", get(meta::handle_health))
        .layer(cors)
        .layer(axum::middleware::from_fn(common::request_logger))
        .with_state(state)
}
