//! 对象存储接口
//!
//! 核心只申请预签名 URL 并在信封里保存返回的 key 引用，
//! 从不经手文件字节。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::repositories::StoreResult;
use crate::value_objects::UserId;

/// 预签名操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresignOperation {
    Put,
    Get,
}

/// 一个带过期时间的预签名 URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
    pub key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// 对象存储
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 为指定 key 签发限时 URL
    async fn presign(
        &self,
        key: &str,
        operation: PresignOperation,
        ttl_seconds: u64,
    ) -> StoreResult<PresignedUrl>;
}

/// 上传对象的 key 布局：uploads/{user}/{uuid}-{文件名}
pub fn upload_object_key(user_id: &UserId, filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("uploads/{}/{}-{}", user_id, Uuid::new_v4(), sanitized)
}
