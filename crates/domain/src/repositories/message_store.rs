//! 持久化存储接口
//!
//! 消息历史、会话预览、用户档案的读写。全部操作都在投递关键路径
//! 之外被调用，失败只记录不重试。

use async_trait::async_trait;

use crate::entities::envelope::Envelope;
use crate::entities::profile::{ConversationPreview, UserProfile};
use crate::repositories::StoreResult;
use crate::value_objects::{ConversationId, UserId};

/// 持久化存储
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 追加一条消息。键为 (会话, 入口时间戳, 入口序号)，
    /// 重复写入同一键是幂等的。
    async fn put_message(&self, envelope: &Envelope) -> StoreResult<()>;

    /// 更新会话的最后一条消息预览，不存在则创建
    async fn upsert_conversation_preview(
        &self,
        preview: &ConversationPreview,
    ) -> StoreResult<()>;

    /// 拉取会话最近的 `limit` 条消息，按 (时间戳, 序号) 升序返回
    async fn history(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> StoreResult<Vec<Envelope>>;

    /// 读取用户档案，不存在返回 `None`
    async fn get_user_profile(&self, user_id: &UserId) -> StoreResult<Option<UserProfile>>;

    /// 写入用户档案
    async fn put_user_profile(&self, profile: &UserProfile) -> StoreResult<()>;

    /// 为用户的持久化消息计数加一
    async fn increment_message_count(&self, user_id: &UserId) -> StoreResult<()>;

    /// 把会话加入用户的会话列表，已存在则为空操作
    async fn add_conversation_to_user(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<()>;

    /// 用户的会话预览列表，按最后活动时间降序
    async fn conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> StoreResult<Vec<ConversationPreview>>;
}
