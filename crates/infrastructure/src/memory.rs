//! 进程内存储实现
//!
//! 单节点模式（未配置 Redis 时的会话存储）和端到端测试使用。
//! 语义与对应的外部存储保持一致：会话按 TTL 淘汰，消息键幂等，
//! 历史按 (时间戳, 序号) 升序。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    ConversationId, ConversationPreview, Envelope, MessageStore, SessionRecord, SessionStore,
    StoreResult, UserId, UserProfile,
};
use time::OffsetDateTime;

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<String, (SessionRecord, OffsetDateTime)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let Ok(mut records) = self.records.lock() else {
            return Ok(None);
        };
        // 读取时惰性淘汰过期条目，模拟存储端 TTL
        match records.get(session_id) {
            Some((_, evict_at)) if *evict_at <= OffsetDateTime::now_utc() => {
                records.remove(session_id);
                Ok(None)
            }
            Some((record, _)) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        session_id: &str,
        record: SessionRecord,
        ttl: Duration,
    ) -> StoreResult<()> {
        if let Ok(mut records) = self.records.lock() {
            let evict_at = OffsetDateTime::now_utc() + ttl;
            records.insert(session_id.to_string(), (record, evict_at));
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> StoreResult<()> {
        if let Ok(mut records) = self.records.lock() {
            records.remove(session_id);
        }
        Ok(())
    }
}

/// 内存持久化存储
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<Envelope>>,
    previews: Mutex<HashMap<ConversationId, ConversationPreview>>,
    profiles: Mutex<HashMap<UserId, UserProfile>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn put_message(&self, envelope: &Envelope) -> StoreResult<()> {
        let Ok(mut messages) = self.messages.lock() else {
            return Ok(());
        };
        let exists = messages.iter().any(|m| {
            m.conversation_id == envelope.conversation_id
                && m.ordering_key() == envelope.ordering_key()
        });
        if !exists {
            messages.push(envelope.clone());
        }
        Ok(())
    }

    async fn upsert_conversation_preview(
        &self,
        preview: &ConversationPreview,
    ) -> StoreResult<()> {
        if let Ok(mut previews) = self.previews.lock() {
            previews.insert(preview.conversation_id.clone(), preview.clone());
        }
        Ok(())
    }

    async fn history(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> StoreResult<Vec<Envelope>> {
        let Ok(messages) = self.messages.lock() else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<Envelope> = messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by_key(Envelope::ordering_key);
        // 取最近的 limit 条，保持升序返回
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn get_user_profile(&self, user_id: &UserId) -> StoreResult<Option<UserProfile>> {
        let Ok(profiles) = self.profiles.lock() else {
            return Ok(None);
        };
        Ok(profiles.get(user_id).cloned())
    }

    async fn put_user_profile(&self, profile: &UserProfile) -> StoreResult<()> {
        if let Ok(mut profiles) = self.profiles.lock() {
            profiles
                .entry(profile.user_id.clone())
                .or_insert_with(|| profile.clone());
        }
        Ok(())
    }

    async fn increment_message_count(&self, user_id: &UserId) -> StoreResult<()> {
        if let Ok(mut profiles) = self.profiles.lock() {
            let profile = profiles
                .entry(user_id.clone())
                .or_insert_with(|| UserProfile::new_default(user_id.clone()));
            profile.message_count += 1;
        }
        Ok(())
    }

    async fn add_conversation_to_user(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<()> {
        if let Ok(mut profiles) = self.profiles.lock() {
            let profile = profiles
                .entry(user_id.clone())
                .or_insert_with(|| UserProfile::new_default(user_id.clone()));
            if !profile.conversations.contains(conversation_id) {
                profile.conversations.push(conversation_id.clone());
            }
        }
        Ok(())
    }

    async fn conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> StoreResult<Vec<ConversationPreview>> {
        let conversations = {
            let Ok(profiles) = self.profiles.lock() else {
                return Ok(Vec::new());
            };
            profiles
                .get(user_id)
                .map(|p| p.conversations.clone())
                .unwrap_or_default()
        };

        let Ok(previews) = self.previews.lock() else {
            return Ok(Vec::new());
        };
        let mut result: Vec<ConversationPreview> = conversations
            .iter()
            .filter_map(|c| previews.get(c).cloned())
            .collect();
        result.sort_by_key(|p| std::cmp::Reverse(p.last_timestamp_micros));
        Ok(result)
    }
}
