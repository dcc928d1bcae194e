//! 应用层错误分类
//!
//! 对应发送路径上的几类结局：握手被拒、配额不足、总线降级、
//! 存储不可用。接收侧的任何状况都不会升级为进程级错误。

use domain::{DomainError, StoreError};
use thiserror::Error;

use crate::bus::BusError;
use crate::quota::QuotaDenied;
use crate::registry::RegistryError;

/// 应用层错误类型
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 会话无效、过期或查询失败，连接在握手阶段被拒绝
    #[error("session rejected: {reason}")]
    RejectedAuth { reason: String },

    /// 配额不足，只报告给发送者，会话不受影响
    #[error(transparent)]
    QuotaDenied(#[from] QuotaDenied),

    /// 发送者不是目标会话的参与者
    #[error("sender is not a participant of the conversation")]
    NotParticipant,

    /// 注册表资源耗尽，发送路径上唯一的硬失败
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// 总线不可用，重试耗尽后降级为仅本地投递
    #[error("bus unavailable: {0}")]
    Bus(#[from] BusError),

    /// 持久化存储不可用
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApplicationError {
    pub fn rejected_auth(reason: impl Into<String>) -> Self {
        Self::RejectedAuth {
            reason: reason.into(),
        }
    }
}
