//! 主应用程序入口
//!
//! 组装路由核心并启动 Axum 服务：配置了 Redis 时走跨节点扇出，
//! 否则退化为单节点进程内总线。

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use application::bus::MessageBus;
use application::{
    ConnectionRegistry, MessageRouter, PersistenceAdapter, QuotaGate, QuotaSettings, RouterConfig,
    SessionValidator,
};
use config::AppConfig;
use domain::{Envelope, MessageStore, NodeId, ObjectStore, SessionStore};
use infrastructure::{
    create_pg_pool, HmacPresigner, LocalBus, MemorySessionStore, PgMessageStore, RedisBus,
    RedisBusConfig, RedisSessionStore, MIGRATOR,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();
    config.validate()?;

    let node_id = config
        .server
        .node_id
        .map(NodeId::from)
        .unwrap_or_else(NodeId::generate);
    tracing::info!(%node_id, "节点标识已确定");

    // 持久化存储
    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').last().unwrap_or("unknown")
    );
    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
    MIGRATOR.run(&pg_pool).await?;
    let message_store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pg_pool));

    // 总线与会话存储
    let (bus, bus_rx, session_store) = build_bus_and_sessions(&config).await?;

    // 路由核心
    let registry = Arc::new(ConnectionRegistry::new(config.server.max_connections));
    let quota = Arc::new(QuotaGate::new(QuotaSettings {
        max_free_messages: config.quota.max_free_messages,
        window: Duration::from_secs(config.quota.window_secs),
        max_free_file_bytes: config.quota.max_free_file_bytes,
        max_premium_file_bytes: config.quota.max_premium_file_bytes,
    }));
    let persistence = Arc::new(PersistenceAdapter::new(Arc::clone(&message_store)));
    let router_core = Arc::new(MessageRouter::new(
        node_id,
        registry,
        Arc::clone(&quota),
        bus,
        persistence,
        RouterConfig {
            publish_attempts: config.bus.publish_attempts,
            ..RouterConfig::default()
        },
    ));

    // 总线接收循环：其他节点发布的信封从这里进入路由器
    spawn_bus_receive_loop(Arc::clone(&router_core), bus_rx);

    let validator = Arc::new(SessionValidator::new(session_store));
    let presigner: Arc<dyn ObjectStore> = Arc::new(HmacPresigner::new(
        config.upload.base_url.clone(),
        &config.upload.signing_secret,
    ));

    let state = web_api::AppState::new(
        validator,
        Arc::clone(&router_core),
        quota,
        message_store,
        presigner,
        config.upload.presign_ttl_secs,
    );

    let app = web_api::router(state);
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    tracing::info!(
        "聊天服务启动在 http://{}:{}",
        config.server.host,
        config.server.port
    );

    // 停机序列：停止接入新连接，给在途路由一个宽限期，再关闭
    // 所有连接写端
    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("收到停机信号，停止接入新连接");
            tokio::time::sleep(Duration::from_secs(config.server.shutdown_grace_secs)).await;
            router_core.drain();
            tracing::info!("排空完成，进程退出");
        }
    }

    Ok(())
}

/// 配置了 Redis 时构建跨节点总线和 Redis 会话存储，
/// 否则构建进程内总线（单节点模式）。
async fn build_bus_and_sessions(
    config: &AppConfig,
) -> anyhow::Result<(
    Arc<dyn MessageBus>,
    mpsc::UnboundedReceiver<Envelope>,
    Arc<dyn SessionStore>,
)> {
    match &config.bus.redis_url {
        Some(redis_url) => {
            let bus = RedisBus::new(RedisBusConfig {
                url: redis_url.clone(),
                channel_prefix: config.bus.channel_prefix.clone(),
                ..RedisBusConfig::default()
            })
            .await?;
            let rx = bus.start();
            let sessions = RedisSessionStore::new(redis_url).await?;
            Ok((Arc::new(bus), rx, Arc::new(sessions)))
        }
        None => {
            tracing::warn!("未配置 REDIS_URL，退化为单节点进程内总线");
            let bus = LocalBus::default();
            let rx = bus.start();
            Ok((Arc::new(bus), rx, Arc::new(MemorySessionStore::new())))
        }
    }
}

fn spawn_bus_receive_loop(
    router: Arc<MessageRouter>,
    mut bus_rx: mpsc::UnboundedReceiver<Envelope>,
) {
    tokio::spawn(async move {
        while let Some(envelope) = bus_rx.recv().await {
            router.handle_bus_envelope(envelope).await;
        }
        tracing::info!("总线接收循环退出");
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "监听 Ctrl-C 失败");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "监听 SIGTERM 失败"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
