//! 路由器集成测试的支撑件：进程内模拟总线和内存存储。
//!
//! 总线枢纽让多个路由器实例挂在同一组频道上，模拟跨节点集群；
//! 发布者自己也会收到订阅频道的消息，回声抑制由路由器负责。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::bus::{BusError, MessageBus};
use application::{
    ConnectionRegistry, MessageRouter, PersistenceAdapter, QuotaGate, QuotaSettings, RouterConfig,
};
use async_trait::async_trait;
use domain::{
    ConversationId, ConversationPreview, Envelope, MessageStore, NodeId, StoreError, StoreResult,
    UserId, UserProfile,
};
use tokio::sync::mpsc;

/// 进程内总线枢纽，一个实例代表一条共享的 pub/sub 通道
#[derive(Default)]
pub struct BusHub {
    nodes: Mutex<Vec<HubNode>>,
}

struct HubNode {
    subscribed: Arc<Mutex<HashSet<ConversationId>>>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl BusHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 接入一个节点，返回它的总线适配器和接收端
    pub fn attach(self: &Arc<Self>) -> (TestBus, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribed = Arc::new(Mutex::new(HashSet::new()));
        self.nodes.lock().unwrap().push(HubNode {
            subscribed: Arc::clone(&subscribed),
            tx,
        });
        (
            TestBus {
                hub: Arc::clone(self),
                subscribed,
                fail_publish: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    fn fan_out(&self, envelope: &Envelope) {
        for node in self.nodes.lock().unwrap().iter() {
            let wants = node
                .subscribed
                .lock()
                .unwrap()
                .contains(&envelope.conversation_id);
            if wants {
                let _ = node.tx.send(envelope.clone());
            }
        }
    }
}

/// 单个节点视角的总线适配器
pub struct TestBus {
    hub: Arc<BusHub>,
    subscribed: Arc<Mutex<HashSet<ConversationId>>>,
    pub fail_publish: Arc<AtomicBool>,
}

#[async_trait]
impl MessageBus for TestBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::publish("injected failure"));
        }
        self.hub.fan_out(envelope);
        Ok(())
    }

    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError> {
        self.subscribed.lock().unwrap().insert(conversation_id.clone());
        Ok(())
    }

    async fn unsubscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError> {
        self.subscribed.lock().unwrap().remove(conversation_id);
        Ok(())
    }
}

/// 内存持久化存储
#[derive(Default)]
pub struct MemStore {
    pub messages: Mutex<Vec<Envelope>>,
    pub previews: Mutex<HashMap<ConversationId, ConversationPreview>>,
    pub profiles: Mutex<HashMap<UserId, UserProfile>>,
    pub fail_profile_reads: AtomicBool,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn stored_count_for(&self, user_id: &UserId) -> u32 {
        self.profiles
            .lock()
            .unwrap()
            .get(user_id)
            .map(|p| p.message_count)
            .unwrap_or(0)
    }

    pub fn insert_profile(&self, profile: UserProfile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl MessageStore for MemStore {
    async fn put_message(&self, envelope: &Envelope) -> StoreResult<()> {
        let mut messages = self.messages.lock().unwrap();
        // 键 (会话, 时间戳, 序号) 上的重复写入是幂等的
        let exists = messages.iter().any(|m| {
            m.conversation_id == envelope.conversation_id
                && m.ordering_key() == envelope.ordering_key()
        });
        if !exists {
            messages.push(envelope.clone());
        }
        Ok(())
    }

    async fn upsert_conversation_preview(
        &self,
        preview: &ConversationPreview,
    ) -> StoreResult<()> {
        self.previews
            .lock()
            .unwrap()
            .insert(preview.conversation_id.clone(), preview.clone());
        Ok(())
    }

    async fn history(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> StoreResult<Vec<Envelope>> {
        let mut matching: Vec<Envelope> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by_key(Envelope::ordering_key);
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn get_user_profile(&self, user_id: &UserId) -> StoreResult<Option<UserProfile>> {
        if self.fail_profile_reads.load(Ordering::SeqCst) {
            return Err(StoreError::storage("injected profile read failure"));
        }
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn put_user_profile(&self, profile: &UserProfile) -> StoreResult<()> {
        self.profiles
            .lock()
            .unwrap()
            .entry(profile.user_id.clone())
            .or_insert_with(|| profile.clone());
        Ok(())
    }

    async fn increment_message_count(&self, user_id: &UserId) -> StoreResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .entry(user_id.clone())
            .or_insert_with(|| UserProfile::new_default(user_id.clone()));
        profile.message_count += 1;
        Ok(())
    }

    async fn add_conversation_to_user(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> StoreResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .entry(user_id.clone())
            .or_insert_with(|| UserProfile::new_default(user_id.clone()));
        if !profile.conversations.contains(conversation_id) {
            profile.conversations.push(conversation_id.clone());
        }
        Ok(())
    }

    async fn conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> StoreResult<Vec<ConversationPreview>> {
        let profiles = self.profiles.lock().unwrap();
        let previews = self.previews.lock().unwrap();
        let mut result: Vec<ConversationPreview> = profiles
            .get(user_id)
            .map(|p| {
                p.conversations
                    .iter()
                    .filter_map(|c| previews.get(c).cloned())
                    .collect()
            })
            .unwrap_or_default();
        result.sort_by_key(|p| std::cmp::Reverse(p.last_timestamp_micros));
        Ok(result)
    }
}

/// 模拟集群里的一个节点
pub struct TestNode {
    pub router: Arc<MessageRouter>,
    pub bus_rx: mpsc::UnboundedReceiver<Envelope>,
    pub fail_publish: Arc<AtomicBool>,
}

impl TestNode {
    /// 把总线积压的信封喂给路由器，模拟后台接收循环
    pub async fn pump(&mut self) {
        while let Ok(envelope) = self.bus_rx.try_recv() {
            self.router.handle_bus_envelope(envelope).await;
        }
    }
}

/// 组装一个节点：注册表 + 配额门 + 总线适配器 + 持久化
pub fn make_node(hub: &Arc<BusHub>, store: Arc<MemStore>, settings: QuotaSettings) -> TestNode {
    let (bus, bus_rx) = hub.attach();
    let fail_publish = Arc::clone(&bus.fail_publish);
    let router = MessageRouter::new(
        NodeId::generate(),
        Arc::new(ConnectionRegistry::new(1024)),
        Arc::new(QuotaGate::new(settings)),
        Arc::new(bus),
        Arc::new(PersistenceAdapter::new(store)),
        RouterConfig {
            publish_attempts: 2,
            publish_backoff: Duration::from_millis(1),
        },
    );
    TestNode {
        router: Arc::new(router),
        bus_rx,
        fail_publish,
    }
}

pub fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}

pub fn conversation(a: &str, b: &str) -> ConversationId {
    ConversationId::direct(&user(a), &user(b)).unwrap()
}

/// 档案里带会话列表的用户，接入时节点会订阅这些频道
pub fn profile_with(user_id: &str, conversations: Vec<ConversationId>) -> UserProfile {
    let mut profile = UserProfile::new_default(user(user_id));
    profile.conversations = conversations;
    profile
}

/// 轮询等待异步持久化完成
pub async fn wait_for(description: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within timeout: {description}");
}
