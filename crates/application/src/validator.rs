//! 会话校验
//!
//! 握手热路径上的一次只读检查：令牌缺失、格式非法、记录缺失或
//! 过期都拒绝接入。长连接建立后不再中途复验，吊销依赖存储端的
//! TTL 淘汰。

use std::sync::Arc;

use domain::{SessionStore, UserId};
use time::OffsetDateTime;
use tracing::warn;

use crate::error::ApplicationError;

/// 会话校验器
pub struct SessionValidator {
    store: Arc<dyn SessionStore>,
}

impl SessionValidator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// 校验会话令牌，通过时返回关联的用户标识。
    ///
    /// 存储查询失败按拒绝处理（fail closed）。
    pub async fn validate(&self, token: Option<&str>) -> Result<UserId, ApplicationError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApplicationError::rejected_auth("missing session token"))?;

        if token.len() > 128
            || !token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ApplicationError::rejected_auth("malformed session token"));
        }

        match self.store.get(token).await {
            Ok(Some(record)) => {
                if record.is_expired(OffsetDateTime::now_utc()) {
                    Err(ApplicationError::rejected_auth("session expired"))
                } else {
                    Ok(record.user_id)
                }
            }
            Ok(None) => Err(ApplicationError::rejected_auth("session not found")),
            Err(err) => {
                warn!(error = %err, "会话存储查询失败，按拒绝处理");
                Err(ApplicationError::rejected_auth("session lookup failed"))
            }
        }
    }
}
