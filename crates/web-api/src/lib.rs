//! Web API 层。
//!
//! 提供 Axum 路由：健康检查、服务状态，以及把注册表消息推给浏览器的 SSE 事件流。

mod auth;
mod error;
mod routes;
pub mod sse;
mod state;

pub use auth::{AuthSession, Claims, JwtService, TOKEN_COOKIE};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
