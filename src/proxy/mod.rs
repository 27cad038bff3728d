// proxy 模块 - 请求路由与上游转发

pub mod endpoint;
pub mod handlers;
pub mod models;
pub mod router;

pub use router::AccountRouter;
