//! 身份会话存储接口

use std::time::Duration;

use async_trait::async_trait;

use crate::entities::session::SessionRecord;
use crate::repositories::StoreResult;

/// 会话存储。
///
/// TTL 到期淘汰是存储自身的职责，核心不做回收；
/// 吊销通过删除记录或等待 TTL 过期生效。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 查询会话记录，不存在返回 `None`
    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>>;

    /// 写入会话记录并设置存活时间
    async fn put(&self, session_id: &str, record: SessionRecord, ttl: Duration)
        -> StoreResult<()>;

    /// 删除会话记录，幂等
    async fn delete(&self, session_id: &str) -> StoreResult<()>;
}
