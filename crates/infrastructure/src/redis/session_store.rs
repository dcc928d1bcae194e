//! Redis 会话存储
//!
//! 记录以 JSON 存放，TTL 淘汰交给 Redis 的 `SET .. EX`，
//! 核心不做回收。

use std::time::Duration;

use async_trait::async_trait;
use domain::{SessionRecord, SessionStore, StoreError, StoreResult};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::debug;

use super::{RedisError, RedisResult};

const KEY_PREFIX: &str = "session:";

/// Redis 会话存储
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn new(url: &str) -> RedisResult<Self> {
        let client = Client::open(url).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| RedisError::ConnectionError {
                message: format!("建立会话存储连接失败: {}", e),
            })?;
        Ok(Self { conn })
    }

    fn key_for(session_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(Self::key_for(session_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::storage(e.to_string()))?;

        match value {
            Some(json) => {
                let record: SessionRecord = serde_json::from_str(&json)
                    .map_err(|e| StoreError::serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        session_id: &str,
        record: SessionRecord,
        ttl: Duration,
    ) -> StoreResult<()> {
        let json =
            serde_json::to_string(&record).map_err(|e| StoreError::serialization(e.to_string()))?;

        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::key_for(session_id))
            .arg(json)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::storage(e.to_string()))?;

        debug!(session_id, ttl_secs = ttl.as_secs(), "会话已写入");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: u32 = redis::cmd("DEL")
            .arg(Self::key_for(session_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::storage(e.to_string()))?;
        Ok(())
    }
}
