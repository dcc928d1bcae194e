//! Redis 适配器
//!
//! 扇出总线（pub/sub）和会话存储（SET EX / GET / DEL）。

mod bus;
mod error;
mod session_store;

pub use bus::{RedisBus, RedisBusConfig};
pub use error::{RedisError, RedisResult};
pub use session_store::RedisSessionStore;

use domain::ConversationId;

/// 会话频道命名：前缀 + 会话标识
pub(crate) fn channel_for(prefix: &str, conversation_id: &ConversationId) -> String {
    format!("{}{}", prefix, conversation_id)
}
