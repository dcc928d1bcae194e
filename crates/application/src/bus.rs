//! 扇出总线抽象
//!
//! 总线语义：至少一次投递，跨频道不保证顺序。重复和乱序由
//! 路由器兜底（消息去重 + 入口时间戳排序），适配器不负责。

use async_trait::async_trait;
use domain::{ConversationId, Envelope};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("bus connection failed: {0}")]
    Connection(String),
}

impl BusError {
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish(message.into())
    }

    pub fn subscribe(message: impl Into<String>) -> Self {
        Self::Subscribe(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}

/// 跨节点消息总线
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// 把信封发布到会话频道，所有订阅节点各收到一份
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError>;

    /// 订阅会话频道。重复订阅是空操作
    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError>;

    /// 退订会话频道。未订阅时退订是空操作
    async fn unsubscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError>;
}
