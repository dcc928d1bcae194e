//! 持久化适配器
//!
//! 投递成功与否都要落历史（离线方也得能补到）。写入完全异步，
//! 绝不阻塞投递路径；失败记日志丢弃，依靠下一条消息或重连后的
//! 历史拉取补偿。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use domain::{ConversationPreview, Envelope, MessageStore, UserProfile};
use tracing::{debug, warn};

/// 持久化适配器
pub struct PersistenceAdapter {
    store: Arc<dyn MessageStore>,
    /// 本进程已经登记过参与者名单的会话
    known_conversations: Mutex<HashSet<domain::ConversationId>>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            known_conversations: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        Arc::clone(&self.store)
    }

    /// 异步记录一条已路由的信封。立即返回，不等待存储。
    pub fn record(&self, envelope: Envelope) {
        let store = Arc::clone(&self.store);
        let first_sight = self.mark_conversation(&envelope);
        tokio::spawn(async move {
            Self::persist(store, envelope, first_sight).await;
        });
    }

    fn mark_conversation(&self, envelope: &Envelope) -> bool {
        match self.known_conversations.lock() {
            Ok(mut known) => known.insert(envelope.conversation_id.clone()),
            Err(_) => false,
        }
    }

    async fn persist(store: Arc<dyn MessageStore>, envelope: Envelope, first_sight: bool) {
        if let Err(err) = store.put_message(&envelope).await {
            warn!(
                conversation = %envelope.conversation_id,
                error = %err,
                "消息落库失败，投递结果不受影响"
            );
            return;
        }

        let participants = envelope.conversation_id.participants();
        let preview = ConversationPreview {
            conversation_id: envelope.conversation_id.clone(),
            last_content: envelope.preview(),
            last_timestamp_micros: envelope.timestamp_micros,
            participants: participants.clone(),
        };
        if let Err(err) = store.upsert_conversation_preview(&preview).await {
            warn!(conversation = %envelope.conversation_id, error = %err, "更新会话预览失败");
        }

        // 本进程第一次见到这个会话时，把会话登记到每个参与者名下，
        // 对端节点在该用户下次接入时据此订阅
        if first_sight {
            for participant in &participants {
                if let Err(err) = store
                    .add_conversation_to_user(participant, &envelope.conversation_id)
                    .await
                {
                    warn!(user = %participant, error = %err, "登记用户会话失败");
                }
            }
        }

        debug!(
            conversation = %envelope.conversation_id,
            message = %envelope.message_id,
            "消息已落库"
        );
    }

    /// 确保用户档案存在，首次出现时写入默认档案
    pub fn ensure_profile(&self, profile: UserProfile) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.put_user_profile(&profile).await {
                warn!(user = %profile.user_id, error = %err, "写入用户档案失败");
            }
        });
    }

    /// 为用户异步累加持久化消息计数，丢失的递增靠下一次读穿对账
    pub fn flush_message_count(&self, user_id: domain::UserId) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.increment_message_count(&user_id).await {
                warn!(user = %user_id, error = %err, "回写消息计数失败");
            }
        });
    }
}
