//! 消息路由器
//!
//! 跨节点扇出协议的协调核心。出站：入口打戳、本地投递、无条件
//! 发布到总线、异步落库。入站：抑制自己的回声、丢弃重复信封、
//! 只投递本地注册的参与者。
//!
//! 本地投递的成败与远端扇出无关：发布重试耗尽只是降级（远端
//! 参与者收不到实时消息，靠历史拉取补偿），不影响已完成的本地
//! 投递，也不升级为连接错误。

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::{
    ConnectionId, ConversationId, Envelope, MessageId, MessageKind, NodeId, UserId, UserProfile,
    UserTier,
};
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::clock::IngressClock;
use crate::error::ApplicationError;
use crate::persistence::PersistenceAdapter;
use crate::quota::QuotaGate;
use crate::registry::{ConnectionRegistry, EnvelopeSender};
use crate::retry::{retry_async, Backoff, RetryConfig};
use crate::subscriptions::SubscriptionTracker;

/// 去重窗口容量
const SEEN_CAPACITY: usize = 4096;

/// 路由器参数
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// 总线发布的尝试次数上限
    pub publish_attempts: u32,
    /// 发布重试的退避基准
    pub publish_backoff: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            publish_attempts: 3,
            publish_backoff: Duration::from_millis(50),
        }
    }
}

/// 最近处理过的总线信封，兜底至少一次投递带来的重复
#[derive(Default)]
struct SeenWindow {
    order: VecDeque<MessageId>,
    set: HashSet<MessageId>,
}

/// 消息路由器
pub struct MessageRouter {
    node_id: NodeId,
    registry: Arc<ConnectionRegistry>,
    quota: Arc<QuotaGate>,
    bus: Arc<dyn MessageBus>,
    persistence: Arc<PersistenceAdapter>,
    clock: IngressClock,
    subscriptions: SubscriptionTracker,
    seen: Mutex<SeenWindow>,
    config: RouterConfig,
}

impl MessageRouter {
    pub fn new(
        node_id: NodeId,
        registry: Arc<ConnectionRegistry>,
        quota: Arc<QuotaGate>,
        bus: Arc<dyn MessageBus>,
        persistence: Arc<PersistenceAdapter>,
        config: RouterConfig,
    ) -> Self {
        Self {
            node_id,
            registry,
            quota,
            bus,
            persistence,
            clock: IngressClock::new(),
            subscriptions: SubscriptionTracker::new(),
            seen: Mutex::new(SeenWindow::default()),
            config,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// 用户的一条连接通过握手后接入。
    ///
    /// 注册套接字、读穿档案播种配额、订阅用户名下的会话频道。
    /// 档案读取失败时免费层按已到上限播种（fail closed）。
    pub async fn connect(
        &self,
        user_id: &UserId,
        sender: EnvelopeSender,
    ) -> Result<ConnectionId, ApplicationError> {
        let connection_id = self.registry.register(user_id.clone(), sender)?;
        self.subscriptions.connect_device(user_id);

        let conversations = match self.persistence.store().get_user_profile(user_id).await {
            Ok(Some(profile)) => {
                self.quota
                    .seed(user_id, profile.tier, profile.message_count);
                profile.conversations
            }
            Ok(None) => {
                self.quota.seed(user_id, UserTier::Free, 0);
                self.persistence
                    .ensure_profile(UserProfile::new_default(user_id.clone()));
                Vec::new()
            }
            Err(err) => {
                warn!(user = %user_id, error = %err, "读取用户档案失败，配额按拒绝播种");
                self.quota.seed_deny_safe(user_id);
                Vec::new()
            }
        };

        for conversation in self.subscriptions.track(user_id, &conversations) {
            if let Err(err) = self.bus.subscribe(&conversation).await {
                // 订阅失败不拦接入，错过的实时消息由历史拉取补偿
                warn!(conversation = %conversation, error = %err, "订阅会话频道失败");
            }
        }

        info!(user = %user_id, %connection_id, "用户连接已接入");
        Ok(connection_id)
    }

    /// 连接断开。注销套接字；用户最后一条连接断开时退订
    /// 本节点已无本地参与者的会话频道。
    pub async fn disconnect(&self, user_id: &UserId, connection_id: ConnectionId) {
        self.registry.unregister(connection_id);
        for conversation in self.subscriptions.disconnect_device(user_id) {
            if let Err(err) = self.bus.unsubscribe(&conversation).await {
                debug!(conversation = %conversation, error = %err, "退订会话频道失败");
            }
        }
        info!(user = %user_id, %connection_id, "用户连接已断开");
    }

    /// 出站消息的完整路径。返回打好戳的信封供回显。
    pub async fn send(
        &self,
        sender_id: &UserId,
        conversation_id: ConversationId,
        kind: MessageKind,
        content: String,
    ) -> Result<Envelope, ApplicationError> {
        if !conversation_id.contains(sender_id) {
            return Err(ApplicationError::NotParticipant);
        }

        let admission = self.quota.admit(sender_id, kind)?;

        // 入口：时间戳、节点序号、节点标识一次性赋予
        let (timestamp_micros, origin_seq) = self.clock.stamp();
        let envelope = Envelope {
            message_id: MessageId::generate(),
            conversation_id,
            sender_id: sender_id.clone(),
            kind,
            content,
            timestamp_micros,
            origin_node: self.node_id,
            origin_seq,
        };

        // 本地投递：发送者自己的各端也算（回显 + 多端同步），
        // 每条连接恰好一次
        let delivered = self.deliver_local(&envelope);
        debug!(
            conversation = %envelope.conversation_id,
            message = %envelope.message_id,
            delivered,
            "本地投递完成"
        );

        // 发送者首次进入的会话即时订阅
        for conversation in self
            .subscriptions
            .track(sender_id, std::slice::from_ref(&envelope.conversation_id))
        {
            if let Err(err) = self.bus.subscribe(&conversation).await {
                warn!(conversation = %conversation, error = %err, "订阅会话频道失败");
            }
        }

        // 成员分布在发送节点是未知的，必须无条件发布
        self.publish_with_retry(&envelope).await;

        if admission.counted {
            self.persistence.flush_message_count(sender_id.clone());
        }

        // 零在线接收者也要落历史
        self.persistence.record(envelope.clone());

        Ok(envelope)
    }

    /// 处理总线送来的信封。
    pub async fn handle_bus_envelope(&self, envelope: Envelope) {
        // 回声抑制：自己发布的消息在出站第 2 步已经本地投递过，
        // 再投一遍就是重复送达
        if envelope.origin_node == self.node_id {
            debug!(message = %envelope.message_id, "回声已抑制");
            return;
        }

        // 总线是至少一次语义，重复的信封直接丢弃
        if !self.mark_seen(envelope.message_id) {
            debug!(message = %envelope.message_id, "重复信封已丢弃");
            return;
        }

        // 只投递本地注册的参与者；一个都不在本节点是正常空操作。
        // 远端信封由入口节点落库，这里不再持久化也不再发布。
        let delivered = self.deliver_local(&envelope);
        debug!(
            conversation = %envelope.conversation_id,
            message = %envelope.message_id,
            delivered,
            "总线信封处理完成"
        );
    }

    /// 停机排空：关闭所有连接写端
    pub fn drain(&self) {
        self.registry.drain();
    }

    fn deliver_local(&self, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        for participant in envelope.conversation_id.participants() {
            delivered += self.registry.deliver(&participant, envelope);
        }
        delivered
    }

    async fn publish_with_retry(&self, envelope: &Envelope) {
        let config = RetryConfig::new(
            self.config.publish_attempts,
            Backoff::exponential(self.config.publish_backoff),
        );
        let result = retry_async(config, || self.bus.publish(envelope)).await;
        if let Err(err) = result {
            warn!(
                conversation = %envelope.conversation_id,
                message = %envelope.message_id,
                error = %err,
                "总线发布重试耗尽，扇出降级为仅本地投递"
            );
        }
    }

    fn mark_seen(&self, message_id: MessageId) -> bool {
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        if seen.set.contains(&message_id) {
            return false;
        }
        seen.set.insert(message_id);
        seen.order.push_back(message_id);
        if seen.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = seen.order.pop_front() {
                seen.set.remove(&oldest);
            }
        }
        true
    }
}
