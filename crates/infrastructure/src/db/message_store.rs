//! 持久化存储的 PostgreSQL 实现

use async_trait::async_trait;
use domain::{
    ConversationId, ConversationPreview, Envelope, MessageId, MessageKind, MessageStore, NodeId,
    StoreError, StoreResult, UserId, UserProfile, UserTier,
};
use sqlx::{query, query_as, FromRow, Row};
use uuid::Uuid;

use super::DbPool;

/// 数据库消息行
#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    conversation_id: String,
    ts_micros: i64,
    origin_seq: i64,
    message_id: Uuid,
    sender_id: String,
    message_type: String,
    content: String,
    origin_node: Uuid,
}

impl TryFrom<DbMessage> for Envelope {
    type Error = StoreError;

    fn try_from(row: DbMessage) -> Result<Self, Self::Error> {
        let conversation_id = ConversationId::parse(row.conversation_id)
            .map_err(|e| StoreError::serialization(e.to_string()))?;
        let sender_id =
            UserId::parse(row.sender_id).map_err(|e| StoreError::serialization(e.to_string()))?;
        let kind = match row.message_type.as_str() {
            "file" => MessageKind::File,
            _ => MessageKind::Text,
        };

        Ok(Envelope {
            message_id: MessageId::from(row.message_id),
            conversation_id,
            sender_id,
            kind,
            content: row.content,
            timestamp_micros: row.ts_micros,
            origin_node: NodeId::from(row.origin_node),
            origin_seq: row.origin_seq as u64,
        })
    }
}

fn kind_as_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::File => "file",
    }
}

fn tier_as_str(tier: UserTier) -> &'static str {
    match tier {
        UserTier::Free => "free",
        UserTier::Premium => "premium",
    }
}

fn tier_from_str(value: &str) -> UserTier {
    match value {
        "premium" => UserTier::Premium,
        _ => UserTier::Free,
    }
}

/// PostgreSQL 持久化存储
pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn put_message(&self, envelope: &Envelope) -> StoreResult<()> {
        // 主键冲突即重复投递，幂等跳过
        query(
            r#"
            INSERT INTO messages (conversation_id, ts_micros, origin_seq, message_id, sender_id, message_type, content, origin_node)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (conversation_id, ts_micros, origin_seq) DO NOTHING
            "#,
        )
        .bind(envelope.conversation_id.as_str())
        .bind(envelope.timestamp_micros)
        .bind(envelope.origin_seq as i64)
        .bind(Uuid::from(envelope.message_id))
        .bind(envelope.sender_id.as_str())
        .bind(kind_as_str(envelope.kind))
        .bind(&envelope.content)
        .bind(envelope.origin_node.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;

        Ok(())
    }

    async fn upsert_conversation_preview(
        &self,
        preview: &ConversationPreview,
    ) -> StoreResult<()> {
        let participants: Vec<String> = preview
            .participants
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();

        // 乱序到达的旧消息不回退预览
        query(
            r#"
            INSERT INTO conversation_previews (conversation_id, last_content, last_ts_micros, participants)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id) DO UPDATE
            SET last_content = EXCLUDED.last_content,
                last_ts_micros = EXCLUDED.last_ts_micros
            WHERE conversation_previews.last_ts_micros <= EXCLUDED.last_ts_micros
            "#,
        )
        .bind(preview.conversation_id.as_str())
        .bind(&preview.last_content)
        .bind(preview.last_timestamp_micros)
        .bind(&participants)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;

        Ok(())
    }

    async fn history(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> StoreResult<Vec<Envelope>> {
        // 取最近 limit 条后翻转为时间升序
        let rows: Vec<DbMessage> = query_as(
            r#"
            SELECT conversation_id, ts_micros, origin_seq, message_id, sender_id, message_type, content, origin_node
            FROM messages
            WHERE conversation_id = $1
            ORDER BY ts_micros DESC, origin_seq DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;

        let mut envelopes = rows
            .into_iter()
            .map(Envelope::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        envelopes.reverse();
        Ok(envelopes)
    }

    async fn get_user_profile(&self, user_id: &UserId) -> StoreResult<Option<UserProfile>> {
        let row = query(
            "SELECT user_id, username, tier, message_count FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let conversations: Vec<String> = query(
            "SELECT conversation_id FROM user_conversations WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?
        .into_iter()
        .map(|r| r.get::<String, _>(0))
        .collect();

        let conversations = conversations
            .into_iter()
            .filter_map(|c| ConversationId::parse(c).ok())
            .collect();

        Ok(Some(UserProfile {
            user_id: UserId::parse(row.get::<String, _>("user_id"))
                .map_err(|e| StoreError::serialization(e.to_string()))?,
            username: row.get("username"),
            tier: tier_from_str(&row.get::<String, _>("tier")),
            message_count: row.get::<i32, _>("message_count") as u32,
            conversations,
        }))
    }

    async fn put_user_profile(&self, profile: &UserProfile) -> StoreResult<()> {
        // 与档案的初始建档语义一致：已存在时不覆盖
        query(
            r#"
            INSERT INTO user_profiles (user_id, username, tier, message_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(profile.user_id.as_str())
        .bind(&profile.username)
        .bind(tier_as_str(profile.tier))
        .bind(profile.message_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;

        for conversation in &profile.conversations {
            self.add_conversation_to_user(&profile.user_id, conversation)
                .await?;
        }
        Ok(())
    }

    async fn increment_message_count(&self, user_id: &UserId) -> StoreResult<()> {
        query(
            r#"
            INSERT INTO user_profiles (user_id, username, tier, message_count)
            VALUES ($1, $1, 'free', 1)
            ON CONFLICT (user_id) DO UPDATE
            SET message_count = user_profiles.message_count + 1
            "#,
        )
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;
        Ok(())
    }

    async fn add_conversation_to_user(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<()> {
        query(
            r#"
            INSERT INTO user_conversations (user_id, conversation_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, conversation_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_str())
        .bind(conversation_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;
        Ok(())
    }

    async fn conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> StoreResult<Vec<ConversationPreview>> {
        let rows = query(
            r#"
            SELECT p.conversation_id, p.last_content, p.last_ts_micros, p.participants
            FROM conversation_previews p
            JOIN user_conversations uc ON uc.conversation_id = p.conversation_id
            WHERE uc.user_id = $1
            ORDER BY p.last_ts_micros DESC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::storage(e.to_string()))?;

        let mut previews = Vec::with_capacity(rows.len());
        for row in rows {
            let conversation_id = ConversationId::parse(row.get::<String, _>("conversation_id"))
                .map_err(|e| StoreError::serialization(e.to_string()))?;
            let participants = row
                .get::<Vec<String>, _>("participants")
                .into_iter()
                .filter_map(|p| UserId::parse(p).ok())
                .collect();
            previews.push(ConversationPreview {
                conversation_id,
                last_content: row.get("last_content"),
                last_timestamp_micros: row.get("last_ts_micros"),
                participants,
            });
        }
        Ok(previews)
    }
}
