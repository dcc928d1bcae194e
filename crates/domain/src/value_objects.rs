use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 会话分隔符，参与者标识中禁止出现
const CONVERSATION_SEPARATOR: &str = "::";

/// 用户唯一标识。
///
/// 由身份提供方下发的 subject 字符串，经过字符集校验后使用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::validation_error("user_id", "cannot be empty"));
        }
        if value.len() > 64 {
            return Err(DomainError::validation_error("user_id", "too long"));
        }
        // 禁止分隔符字符，保证会话键可以无歧义地拆回参与者
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::validation_error(
                "user_id",
                "only alphanumeric, '-' and '_' are allowed",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 会话唯一标识。
///
/// 由参与者集合确定性推导：去重后按字典序排序，用 `::` 连接。
/// 不变量：同一参与者集合无论以什么顺序给出，得到的标识完全相同。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// 从参与者集合推导会话标识
    pub fn from_participants(participants: &[UserId]) -> Result<Self, DomainError> {
        let mut ids: Vec<&str> = participants.iter().map(UserId::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() < 2 {
            return Err(DomainError::conversation_error(
                "a conversation needs at least two distinct participants",
            ));
        }
        Ok(Self(ids.join(CONVERSATION_SEPARATOR)))
    }

    /// 两人会话的便捷构造
    pub fn direct(a: &UserId, b: &UserId) -> Result<Self, DomainError> {
        Self::from_participants(&[a.clone(), b.clone()])
    }

    /// 校验一个外部给出的会话标识是否为规范形式
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let parts: Vec<&str> = value.split(CONVERSATION_SEPARATOR).collect();
        if parts.len() < 2 {
            return Err(DomainError::conversation_error(
                "a conversation needs at least two distinct participants",
            ));
        }
        for part in &parts {
            UserId::parse(*part)?;
        }
        // 规范形式要求严格升序，顺带排除重复
        if !parts.windows(2).all(|w| w[0] < w[1]) {
            return Err(DomainError::conversation_error(
                "participants must be sorted and unique",
            ));
        }
        Ok(Self(value))
    }

    /// 从标识拆回参与者集合
    pub fn participants(&self) -> Vec<UserId> {
        self.0
            .split(CONVERSATION_SEPARATOR)
            .filter_map(|part| UserId::parse(part).ok())
            .collect()
    }

    /// 判断用户是否为会话参与者
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.0
            .split(CONVERSATION_SEPARATOR)
            .any(|part| part == user_id.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消息唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<MessageId> for Uuid {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

/// 单条 WebSocket 连接的标识，每个注册的套接字一个。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 进程标识，节点启动时生成一次。
///
/// 回声抑制依赖它区分自己发布到总线的消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// 用户等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Free,
    Premium,
}

impl UserTier {
    pub fn is_premium(&self) -> bool {
        matches!(self, UserTier::Premium)
    }
}

impl Default for UserTier {
    fn default() -> Self {
        UserTier::Free
    }
}
