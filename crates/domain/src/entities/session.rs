//! 会话记录
//!
//! 核心只读取有效性和关联的用户标识，过期淘汰由存储负责。

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::value_objects::UserId;

/// 外部会话存储中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl SessionRecord {
    pub fn new(user_id: UserId, expires_at: OffsetDateTime) -> Self {
        Self {
            user_id,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}
