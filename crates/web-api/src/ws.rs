//! WebSocket 连接处理
//!
//! 握手时校验会话（失败即 401 拒绝），通过后把连接写端注册进
//! 注册表，由一对任务分别处理收发。配额不足等状况通过带外
//! `error` 帧报告给发送者，不影响连接本身。

use application::ApplicationError;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use domain::{upload_object_key, ConnectionId, ConversationId, MessageKind, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{ClientFrame, ServerFrame};
use crate::state::AppState;

/// WebSocket 连接查询参数
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// 会话令牌
    pub session: Option<String>,
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    Frame(ServerFrame),
    Pong(Vec<u8>),
}

/// 处理 WebSocket 连接升级
pub async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, StatusCode> {
    // 每次建立连接都重新过一遍会话校验
    let user_id = match state.validator.validate(query.session.as_deref()).await {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(error = %err, "WebSocket 握手被拒");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

/// 单条连接的完整生命周期
async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let (envelope_tx, mut envelope_rx) = mpsc::unbounded_channel();

    let connection_id = match state.router.connect(&user_id, envelope_tx).await {
        Ok(connection_id) => connection_id,
        Err(err) => {
            // 注册失败（容量耗尽）：带外报告后关闭连接
            warn!(user = %user_id, error = %err, "连接注册失败");
            let mut socket = socket;
            let frame = ServerFrame::error("REGISTRY_EXHAUSTED", err.to_string());
            if let Ok(json) = serde_json::to_string(&frame) {
                let _ = socket.send(WsMessage::Text(json.into())).await;
            }
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };

    let (mut sender, mut incoming) = socket.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

    // 发送任务：统一处理写操作，路由来的信封和控制帧在此汇合
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(WsCommand::Frame(frame)) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    Some(WsCommand::Pong(data)) => {
                        if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                envelope = envelope_rx.recv() => match envelope {
                    Some(envelope) => {
                        let frame = ServerFrame::from_envelope(&envelope);
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    // 写端被注册表关闭（断连清理或停机排空）
                    None => break,
                },
            }
        }
        debug!("WebSocket 发送任务结束");
    });

    // 接收任务：客户端帧的解析与分发
    let recv_state = state.clone();
    let recv_user = user_id.clone();
    let recv_cmd_tx = cmd_tx.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                WsMessage::Text(text) => {
                    handle_text(&recv_state, &recv_user, text.as_str(), &recv_cmd_tx).await;
                }
                WsMessage::Ping(data) => {
                    if recv_cmd_tx.send(WsCommand::Pong(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                WsMessage::Close(_) => {
                    debug!("客户端关闭连接");
                    break;
                }
                WsMessage::Pong(_) | WsMessage::Binary(_) => {}
            }
        }
        debug!("WebSocket 接收任务结束");
    });

    // 任意一个任务结束即视为连接断开
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    disconnect(&state, &user_id, connection_id).await;
}

async fn disconnect(state: &AppState, user_id: &UserId, connection_id: ConnectionId) {
    state.router.disconnect(user_id, connection_id).await;
    info!(user = %user_id, %connection_id, "WebSocket 连接已清理");
}

async fn send_frame(
    sender: &mut (impl SinkExt<WsMessage> + Unpin),
    frame: &ServerFrame,
) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "序列化服务器帧失败");
            return Ok(());
        }
    };
    sender
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

/// 解析并分发一条客户端文本帧。
/// 无法解析的帧忽略掉，不断开连接。
async fn handle_text(
    state: &AppState,
    user_id: &UserId,
    text: &str,
    cmd_tx: &mpsc::Sender<WsCommand>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(user = %user_id, error = %err, "忽略无法解析的客户端帧");
            return;
        }
    };

    match frame {
        ClientFrame::Chat {
            conversation_id,
            content,
        } => {
            route_message(state, user_id, conversation_id, MessageKind::Text, content, cmd_tx)
                .await;
        }
        ClientFrame::FileUploaded {
            conversation_id,
            key,
            filename: _,
        } => {
            route_message(state, user_id, conversation_id, MessageKind::File, key, cmd_tx).await;
        }
        ClientFrame::FileRequest { filename, filesize } => {
            handle_file_request(state, user_id, filename, filesize, cmd_tx).await;
        }
        ClientFrame::Ping => {
            let _ = cmd_tx.send(WsCommand::Frame(ServerFrame::Pong)).await;
        }
    }
}

async fn route_message(
    state: &AppState,
    user_id: &UserId,
    conversation_id: String,
    kind: MessageKind,
    content: String,
    cmd_tx: &mpsc::Sender<WsCommand>,
) {
    let conversation = match ConversationId::parse(conversation_id) {
        Ok(conversation) => conversation,
        Err(err) => {
            send_error(cmd_tx, "INVALID_CONVERSATION", err.to_string()).await;
            return;
        }
    };

    // 回显经注册表投递，成功路径这里无事可做
    if let Err(err) = state.router.send(user_id, conversation, kind, content).await {
        let code = match &err {
            ApplicationError::QuotaDenied(_) => "QUOTA_DENIED",
            ApplicationError::NotParticipant => "NOT_PARTICIPANT",
            _ => "SEND_FAILED",
        };
        send_error(cmd_tx, code, err.to_string()).await;
    }
}

async fn handle_file_request(
    state: &AppState,
    user_id: &UserId,
    filename: String,
    filesize: u64,
    cmd_tx: &mpsc::Sender<WsCommand>,
) {
    if let Err(denied) = state.quota.check_file_size(user_id, filesize) {
        send_error(cmd_tx, "QUOTA_DENIED", denied.to_string()).await;
        return;
    }

    let key = upload_object_key(user_id, &filename);
    match state
        .object_store
        .presign(&key, domain::PresignOperation::Put, state.presign_ttl_secs)
        .await
    {
        Ok(signed) => {
            let frame = ServerFrame::FileUploadUrl {
                filename,
                url: signed.url,
                key: signed.key,
            };
            let _ = cmd_tx.send(WsCommand::Frame(frame)).await;
        }
        Err(err) => {
            warn!(user = %user_id, error = %err, "签发上传 URL 失败");
            send_error(cmd_tx, "UPLOAD_UNAVAILABLE", "Could not prepare file upload.").await;
        }
    }
}

async fn send_error(
    cmd_tx: &mpsc::Sender<WsCommand>,
    code: &'static str,
    message: impl Into<String>,
) {
    let _ = cmd_tx
        .send(WsCommand::Frame(ServerFrame::error(code, message)))
        .await;
}
