//! 会话订阅追踪
//!
//! 总线频道按需订阅：某会话的第一个本地用户出现时订阅，最后一个
//! 本地用户离线时退订。这只是优化，多订阅无害，少订阅靠历史拉取
//! 兜底。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use domain::{ConversationId, UserId};

#[derive(Default)]
struct TrackerInner {
    /// 用户在本进程的连接数
    device_count: HashMap<UserId, usize>,
    /// 用户关注的会话集合
    user_conversations: HashMap<UserId, HashSet<ConversationId>>,
    /// 会话的本地用户数
    refcounts: HashMap<ConversationId, usize>,
}

/// 订阅追踪器
pub struct SubscriptionTracker {
    inner: Mutex<TrackerInner>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// 记录用户的一条新连接
    pub fn connect_device(&self, user_id: &UserId) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner.device_count.entry(user_id.clone()).or_insert(0) += 1;
        }
    }

    /// 把若干会话挂到用户名下，返回首次出现本地用户、需要向总线
    /// 发起订阅的会话。
    pub fn track(
        &self,
        user_id: &UserId,
        conversations: &[ConversationId],
    ) -> Vec<ConversationId> {
        let Ok(mut inner) = self.inner.lock() else {
            return Vec::new();
        };

        let mut newly_local = Vec::new();
        for conversation in conversations {
            let joined = inner
                .user_conversations
                .entry(user_id.clone())
                .or_default()
                .insert(conversation.clone());
            if joined {
                let count = inner.refcounts.entry(conversation.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    newly_local.push(conversation.clone());
                }
            }
        }
        newly_local
    }

    /// 记录用户断开一条连接。最后一条连接断开时释放该用户的所有
    /// 会话，返回本节点已无任何本地参与者、可以退订的会话。
    pub fn disconnect_device(&self, user_id: &UserId) -> Vec<ConversationId> {
        let Ok(mut inner) = self.inner.lock() else {
            return Vec::new();
        };

        let remaining = match inner.device_count.get_mut(user_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return Vec::new(),
        };
        if remaining > 0 {
            return Vec::new();
        }

        inner.device_count.remove(user_id);
        let conversations = inner.user_conversations.remove(user_id).unwrap_or_default();

        let mut now_empty = Vec::new();
        for conversation in conversations {
            if let Some(count) = inner.refcounts.get_mut(&conversation) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.refcounts.remove(&conversation);
                    now_empty.push(conversation);
                }
            }
        }
        now_empty
    }
}

impl Default for SubscriptionTracker {
    fn default() -> Self {
        Self::new()
    }
}
