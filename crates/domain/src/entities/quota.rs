//! 用户配额快照

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::value_objects::{UserId, UserTier};

/// 配额门在某一时刻持有的用户配额副本。
///
/// 真实来源是外部持久化存储，这里只是发送路径上的缓存视图。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub user_id: UserId,
    pub message_count: u32,
    pub tier: UserTier,
    pub window_start: OffsetDateTime,
}

impl QuotaState {
    pub fn new(user_id: UserId, tier: UserTier, message_count: u32) -> Self {
        Self {
            user_id,
            message_count,
            tier,
            window_start: OffsetDateTime::now_utc(),
        }
    }
}
