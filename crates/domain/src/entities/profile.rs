//! 用户档案与会话预览

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, UserId, UserTier};

/// 持久化存储中的用户档案。
///
/// `conversations` 是用户参与的会话列表，节点在用户接入时
/// 据此订阅对应的总线频道。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: String,
    pub tier: UserTier,
    pub message_count: u32,
    pub conversations: Vec<ConversationId>,
}

impl UserProfile {
    /// 首次出现的用户的默认档案
    pub fn new_default(user_id: UserId) -> Self {
        let username = user_id.as_str().to_string();
        Self {
            user_id,
            username,
            tier: UserTier::Free,
            message_count: 0,
            conversations: Vec::new(),
        }
    }
}

/// 会话列表界面展示的预览条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPreview {
    pub conversation_id: ConversationId,
    pub last_content: String,
    pub last_timestamp_micros: i64,
    pub participants: Vec<UserId>,
}
