//! 外部存储的抽象接口
//!
//! 核心只通过这里的窄接口消费外部协作者：会话存储、持久化存储、
//! 对象存储。具体实现位于 infrastructure。

pub mod message_store;
pub mod object_store;
pub mod session_store;

use thiserror::Error;

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("storage failure: {message}")]
    Storage { message: String },

    #[error("serialization failure: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

/// 存储层结果类型
pub type StoreResult<T> = Result<T, StoreError>;
