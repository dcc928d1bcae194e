//! 消息信封
//!
//! 一条被路由的聊天消息加上路由元数据。信封在入口节点构造，
//! 经过本地投递和总线扇出后交给持久化适配器，内存中不保留。

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::value_objects::{ConversationId, MessageId, NodeId, UserId};

/// 文本预览截断长度
const PREVIEW_MAX_CHARS: usize = 50;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    /// `content` 携带对象存储的 key 引用，不携带文件字节
    File,
}

/// 一条路由中的消息及其路由元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    /// 入口节点赋予的微秒时间戳，会话内排序的唯一依据
    pub timestamp_micros: i64,
    /// 发布消息的节点，接收端据此抑制回声
    pub origin_node: NodeId,
    /// 入口节点单调递增的序号，时间戳相同时的决定性次序
    pub origin_seq: u64,
}

impl Envelope {
    /// 会话内历史排序键
    pub fn ordering_key(&self) -> (i64, u64) {
        (self.timestamp_micros, self.origin_seq)
    }

    /// 时间戳转换为日历时间
    pub fn timestamp(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(self.timestamp_micros as i128 * 1_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    /// 会话列表展示用的内容预览
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::File => "File".to_string(),
            MessageKind::Text => match self.content.char_indices().nth(PREVIEW_MAX_CHARS) {
                Some((idx, _)) => self.content[..idx].to_string(),
                None => self.content.clone(),
            },
        }
    }
}
