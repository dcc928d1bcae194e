//! Redis 适配器错误

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisError {
    #[error("Redis 配置错误: {message}")]
    ConfigError { message: String },

    #[error("Redis 连接错误: {message}")]
    ConnectionError { message: String },

    #[error("Redis 发布错误: {message}")]
    PublishError { message: String },

    #[error("Redis 订阅错误: {message}")]
    SubscribeError { message: String },

    #[error("序列化错误: {message}")]
    SerializationError { message: String },
}

pub type RedisResult<T> = Result<T, RedisError>;
