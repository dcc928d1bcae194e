//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 消息流、会话历史与会话列表的
//! HTTP 查询，把请求委托给应用层的路由核心。

mod error;
mod protocol;
mod routes;
mod state;
mod ws;

pub use error::ApiError;
pub use protocol::{ClientFrame, ServerFrame};
pub use routes::router;
pub use state::AppState;
