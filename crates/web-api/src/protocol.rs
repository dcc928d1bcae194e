//! WebSocket 线上协议
//!
//! 双向都是带 `type` 标签的 JSON 帧。配额不足和会话过期走
//! 带外的 `error` 帧，不会静默吞掉消息。

use domain::{Envelope, MessageKind};
use serde::{Deserialize, Serialize};

/// 客户端到服务器的帧
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 发送文本消息
    Chat {
        conversation_id: String,
        content: String,
    },
    /// 申请文件直传 URL
    FileRequest { filename: String, filesize: u64 },
    /// 文件已上传，把 key 引用投进会话
    FileUploaded {
        conversation_id: String,
        key: String,
        filename: String,
    },
    /// 应用层心跳
    Ping,
}

/// 服务器到客户端的帧
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// 会话里的文本消息
    Chat {
        message_id: String,
        conversation_id: String,
        sender_id: String,
        content: String,
        timestamp: i64,
    },
    /// 会话里的文件消息，content 是对象存储的 key 引用
    File {
        message_id: String,
        conversation_id: String,
        sender_id: String,
        key: String,
        timestamp: i64,
    },
    /// 直传 URL 的答复，只发给申请者
    FileUploadUrl {
        filename: String,
        url: String,
        key: String,
    },
    /// 带外控制信号：配额不足、会话过期等
    Error { code: String, message: String },
    Pong,
}

impl ServerFrame {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        match envelope.kind {
            MessageKind::Text => ServerFrame::Chat {
                message_id: envelope.message_id.to_string(),
                conversation_id: envelope.conversation_id.to_string(),
                sender_id: envelope.sender_id.to_string(),
                content: envelope.content.clone(),
                timestamp: envelope.timestamp_micros,
            },
            MessageKind::File => ServerFrame::File {
                message_id: envelope.message_id.to_string(),
                conversation_id: envelope.conversation_id.to_string(),
                sender_id: envelope.sender_id.to_string(),
                key: envelope.content.clone(),
                timestamp: envelope.timestamp_micros,
            },
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
