//! HTTP 路由
//!
//! `/ws` 消息流之外提供三个查询面：负载均衡探活、会话列表、
//! 会话历史。历史按入口时间戳（同戳看节点序号）升序返回。

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use domain::{ConversationId, Envelope, MessageKind, UserId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::websocket_upgrade;

/// 历史拉取的默认条数
const DEFAULT_HISTORY_LIMIT: u32 = 20;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/{conversation_id}/history", get(get_history))
}

/// 负载均衡器的健康检查
async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
struct AuthQuery {
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    session: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HistoryMessage {
    message_id: String,
    sender_id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    content: String,
    timestamp: i64,
}

impl From<Envelope> for HistoryMessage {
    fn from(envelope: Envelope) -> Self {
        Self {
            message_id: envelope.message_id.to_string(),
            sender_id: envelope.sender_id.to_string(),
            kind: match envelope.kind {
                MessageKind::Text => "text",
                MessageKind::File => "file",
            },
            content: envelope.content,
            timestamp: envelope.timestamp_micros,
        }
    }
}

/// 会话令牌取自 `Authorization: Bearer` 头或 `session` 查询参数
async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    session_param: Option<&str>,
) -> Result<UserId, ApiError> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let token = bearer.or(session_param);
    state.validator.validate(token).await.map_err(ApiError::from)
}

/// 当前用户的会话预览列表，最近活跃的在前
async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
) -> Result<Json<Vec<domain::ConversationPreview>>, ApiError> {
    let user_id = authorize(&state, &headers, query.session.as_deref()).await?;

    let previews = state
        .message_store
        .conversations_for_user(&user_id)
        .await
        .map_err(|err| ApiError::from(application::ApplicationError::Store(err)))?;

    Ok(Json(previews))
}

/// 会话历史，按时间升序
async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryMessage>>, ApiError> {
    let user_id = authorize(&state, &headers, query.session.as_deref()).await?;

    let conversation = ConversationId::parse(conversation_id)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    // 只有参与者可以读历史
    if !conversation.contains(&user_id) {
        return Err(ApiError::forbidden("not a participant of this conversation"));
    }

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(200);
    let history = state
        .message_store
        .history(&conversation, limit)
        .await
        .map_err(|err| ApiError::from(application::ApplicationError::Store(err)))?;

    Ok(Json(history.into_iter().map(HistoryMessage::from).collect()))
}
