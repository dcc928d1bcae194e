//! 端到端测试支撑：内存存储 + 进程内总线组装出完整服务，
//! 绑定随机端口供真实 WebSocket 客户端连接。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::bus::MessageBus;
use application::{
    ConnectionRegistry, MessageRouter, PersistenceAdapter, QuotaGate, QuotaSettings, RouterConfig,
    SessionValidator,
};
use domain::{
    MessageStore, NodeId, ObjectStore, SessionRecord, SessionStore, UserId,
};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{HmacPresigner, LocalBus, MemoryMessageStore, MemorySessionStore};
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use web_api::{AppState, ServerFrame};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub sessions: Arc<MemorySessionStore>,
    pub store: Arc<MemoryMessageStore>,
}

/// 组装并启动一个单节点服务实例
pub async fn spawn_server(quota: QuotaSettings) -> TestServer {
    let sessions = Arc::new(MemorySessionStore::new());
    let store = Arc::new(MemoryMessageStore::new());

    let bus = Arc::new(LocalBus::default());
    let mut bus_rx = bus.start();

    let registry = Arc::new(ConnectionRegistry::new(64));
    let gate = Arc::new(QuotaGate::new(quota));
    let persistence = Arc::new(PersistenceAdapter::new(
        Arc::clone(&store) as Arc<dyn MessageStore>
    ));
    let router_core = Arc::new(MessageRouter::new(
        NodeId::generate(),
        registry,
        Arc::clone(&gate),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        persistence,
        RouterConfig::default(),
    ));

    // 总线接收循环
    {
        let router = Arc::clone(&router_core);
        tokio::spawn(async move {
            while let Some(envelope) = bus_rx.recv().await {
                router.handle_bus_envelope(envelope).await;
            }
        });
    }

    let validator = Arc::new(SessionValidator::new(
        Arc::clone(&sessions) as Arc<dyn SessionStore>
    ));
    let presigner = Arc::new(HmacPresigner::new(
        "http://127.0.0.1:9000/uploads",
        "a-test-signing-secret-of-sufficient-length",
    ));

    let state = AppState::new(
        validator,
        router_core,
        gate,
        Arc::clone(&store) as Arc<dyn MessageStore>,
        presigner as Arc<dyn ObjectStore>,
        3600,
    );

    let app = web_api::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    TestServer {
        addr,
        sessions,
        store,
    }
}

impl TestServer {
    /// 写入一条一小时有效的会话记录
    pub async fn seed_session(&self, session_id: &str, user: &str) {
        let record = SessionRecord::new(
            UserId::parse(user).expect("user id"),
            OffsetDateTime::now_utc() + time::Duration::hours(1),
        );
        self.sessions
            .put(session_id, record, Duration::from_secs(3600))
            .await
            .expect("seed session");
    }

    pub async fn connect_ws(&self, session: &str) -> WsClient {
        let url = format!("ws://{}/ws?session={}", self.addr, session);
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("ws connect");
        socket
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// 发送一条 JSON 文本帧
pub async fn send_json(socket: &mut WsClient, json: &str) {
    socket
        .send(Message::Text(json.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一条服务器帧，超时视为测试失败
pub async fn recv_frame(socket: &mut WsClient) -> ServerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        match message {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("parse server frame");
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// 断言短时间内没有更多帧到达
pub async fn assert_silent(socket: &mut WsClient) {
    let result = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(result.is_err(), "expected no further frames, got {result:?}");
}
