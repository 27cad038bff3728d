//! 固定模型注册表
//! 静态数据，对外只读

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

static MODEL_REGISTRY: Lazy<Vec<ModelInfo>> = Lazy::new(|| {
    vec![
        ModelInfo {
            id: "qwen3-coder-plus",
            object: "model",
            created: 1719878112,
            owned_by: "qwen",
        },
        ModelInfo {
            id: "qwen3-coder-flash",
            object: "model",
            created: 1719878112,
            owned_by: "qwen",
        },
    ]
});

pub fn list_models() -> &'static [ModelInfo] {
    &MODEL_REGISTRY
}

pub fn get_model(id: &str) -> Option<&'static ModelInfo> {
    MODEL_REGISTRY.iter().find(|m| m.id == id)
}
