//! Redis 扇出总线
//!
//! 发布走自动重连的 ConnectionManager；订阅由后台监听循环维护，
//! 断线按指数退避重连，重连后恢复全部频道。总线语义是至少一次
//! 投递，重复和回声由路由器处理。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::bus::{BusError, MessageBus};
use async_trait::async_trait;
use domain::{ConversationId, Envelope};
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::Client;
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{channel_for, RedisError, RedisResult};

/// 总线配置
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub url: String,
    pub channel_prefix: String,
    pub reconnect_base_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            channel_prefix: "conv:".to_string(),
            reconnect_base_ms: 500,
            max_reconnect_attempts: 10,
        }
    }
}

/// Redis 扇出总线适配器
pub struct RedisBus {
    client: Client,
    publish_conn: ConnectionManager,
    config: RedisBusConfig,
    /// 当前订阅的频道集合，重连后据此恢复
    channels: Arc<Mutex<HashSet<String>>>,
    /// 监听循环在线时的订阅写端，掉线期间为空
    sink: Arc<tokio::sync::Mutex<Option<PubSubSink>>>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl RedisBus {
    /// 创建总线适配器并建立发布连接
    pub async fn new(config: RedisBusConfig) -> RedisResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;

        let publish_conn =
            client
                .get_connection_manager()
                .await
                .map_err(|e| RedisError::ConnectionError {
                    message: format!("建立发布连接失败: {}", e),
                })?;

        info!(url = %config.url, "Redis 总线已连接");

        Ok(Self {
            client,
            publish_conn,
            config,
            channels: Arc::new(Mutex::new(HashSet::new())),
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        })
    }

    /// 启动后台监听循环，返回入站信封的接收端。
    /// 路由器消费这个通道并完成回声抑制和本地投递。
    pub fn start(&self) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let channels = Arc::clone(&self.channels);
        let sink_slot = Arc::clone(&self.sink);
        let shutdown = Arc::clone(&self.shutdown);
        let notify = Arc::clone(&self.notify);
        let config = self.config.clone();

        tokio::spawn(async move {
            Self::listen_loop(client, channels, sink_slot, shutdown, notify, config, tx).await;
        });

        rx
    }

    async fn listen_loop(
        client: Client,
        channels: Arc<Mutex<HashSet<String>>>,
        sink_slot: Arc<tokio::sync::Mutex<Option<PubSubSink>>>,
        shutdown: Arc<AtomicBool>,
        notify: Arc<Notify>,
        config: RedisBusConfig,
        tx: mpsc::UnboundedSender<Envelope>,
    ) {
        let mut retry_count = 0u32;

        while !shutdown.load(Ordering::Relaxed) {
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    let snapshot: Vec<String> = match channels.lock() {
                        Ok(set) => set.iter().cloned().collect(),
                        Err(_) => Vec::new(),
                    };
                    let mut subscribed_ok = true;
                    for channel in &snapshot {
                        if let Err(e) = pubsub.subscribe(channel).await {
                            error!(channel, error = %e, "恢复订阅失败");
                            subscribed_ok = false;
                            break;
                        }
                    }

                    if subscribed_ok {
                        retry_count = 0;
                        info!(channels = snapshot.len(), "Redis 订阅监听已就绪");

                        let (sink, mut stream) = pubsub.split();
                        *sink_slot.lock().await = Some(sink);

                        loop {
                            tokio::select! {
                                _ = notify.notified() => {
                                    info!("Redis 监听收到停机信号");
                                    break;
                                }
                                msg = stream.next() => match msg {
                                    Some(msg) => Self::forward_message(msg, &tx),
                                    None => {
                                        warn!("Redis pub/sub 流断开");
                                        break;
                                    }
                                }
                            }
                        }

                        sink_slot.lock().await.take();
                    }
                }
                Err(e) => {
                    error!(error = %e, "获取 pub/sub 连接失败");
                }
            }

            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            retry_count += 1;
            if retry_count >= config.max_reconnect_attempts {
                error!("重连失败，已达最大重试次数");
                break;
            }
            let delay = Duration::from_millis(
                config.reconnect_base_ms * (2u64.pow(retry_count.saturating_sub(1).min(10))),
            );
            sleep(delay).await;
        }

        info!("Redis 监听循环已退出");
    }

    fn forward_message(msg: redis::Msg, tx: &mpsc::UnboundedSender<Envelope>) {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(channel, error = %e, "读取消息负载失败");
                return;
            }
        };
        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) => {
                debug!(channel, message = %envelope.message_id, "收到总线信封");
                if tx.send(envelope).is_err() {
                    warn!("信封接收端已关闭");
                }
            }
            Err(e) => {
                error!(channel, error = %e, "反序列化信封失败");
            }
        }
    }

    /// 停止监听循环
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// 当前订阅的频道列表
    pub fn subscriptions(&self) -> Vec<String> {
        self.channels
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError> {
        let channel = channel_for(&self.config.channel_prefix, &envelope.conversation_id);
        let payload = serde_json::to_string(envelope)
            .map_err(|e| BusError::publish(format!("序列化信封失败: {}", e)))?;

        let mut conn = self.publish_conn.clone();
        let receivers: u32 = redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::publish(e.to_string()))?;

        debug!(channel, receivers, message = %envelope.message_id, "信封已发布");
        Ok(())
    }

    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError> {
        let channel = channel_for(&self.config.channel_prefix, conversation_id);

        let newly_added = match self.channels.lock() {
            Ok(mut set) => set.insert(channel.clone()),
            Err(_) => false,
        };
        if !newly_added {
            return Ok(());
        }

        // 监听循环在线时即时生效，掉线时重连流程会恢复
        if let Some(sink) = self.sink.lock().await.as_mut() {
            sink.subscribe(&channel)
                .await
                .map_err(|e| BusError::subscribe(e.to_string()))?;
        }
        debug!(channel, "已订阅会话频道");
        Ok(())
    }

    async fn unsubscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError> {
        let channel = channel_for(&self.config.channel_prefix, conversation_id);

        let removed = match self.channels.lock() {
            Ok(mut set) => set.remove(&channel),
            Err(_) => false,
        };
        if !removed {
            return Ok(());
        }

        if let Some(sink) = self.sink.lock().await.as_mut() {
            sink.unsubscribe(&channel)
                .await
                .map_err(|e| BusError::subscribe(e.to_string()))?;
        }
        debug!(channel, "已退订会话频道");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{MessageId, MessageKind, NodeId, UserId};

    fn test_config() -> RedisBusConfig {
        RedisBusConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            channel_prefix: "test_conv:".to_string(),
            reconnect_base_ms: 100,
            max_reconnect_attempts: 3,
        }
    }

    fn test_envelope() -> Envelope {
        let alice = UserId::parse("alice").unwrap();
        let bob = UserId::parse("bob").unwrap();
        Envelope {
            message_id: MessageId::generate(),
            conversation_id: ConversationId::direct(&alice, &bob).unwrap(),
            sender_id: alice,
            kind: MessageKind::Text,
            content: "hi".to_string(),
            timestamp_micros: 100,
            origin_node: NodeId::generate(),
            origin_seq: 0,
        }
    }

    // 需要运行中的 Redis 实例才执行
    #[tokio::test]
    async fn publish_roundtrip_through_redis() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }

        let bus = RedisBus::new(test_config()).await.unwrap();
        let envelope = test_envelope();
        bus.subscribe(&envelope.conversation_id).await.unwrap();
        let mut rx = bus.start();

        // 等监听循环完成订阅
        tokio::time::sleep(Duration::from_millis(200)).await;
        bus.publish(&envelope).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("listener closed");
        assert_eq!(received.message_id, envelope.message_id);

        bus.shutdown();
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_noop() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }

        let bus = RedisBus::new(test_config()).await.unwrap();
        let envelope = test_envelope();
        bus.subscribe(&envelope.conversation_id).await.unwrap();
        bus.subscribe(&envelope.conversation_id).await.unwrap();
        assert_eq!(bus.subscriptions().len(), 1);
    }
}
