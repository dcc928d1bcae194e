//! 进程内总线
//!
//! 单节点部署和测试用的总线实现：`tokio::sync::broadcast` 回环。
//! 发布者自己也会收到订阅频道的消息，和真实 pub/sub 一致，
//! 回声由路由器抑制。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use application::bus::{BusError, MessageBus};
use async_trait::async_trait;
use domain::{ConversationId, Envelope};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// 进程内总线
pub struct LocalBus {
    sender: broadcast::Sender<Envelope>,
    subscribed: Arc<Mutex<HashSet<ConversationId>>>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscribed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 启动转发循环，返回入站信封的接收端
    pub fn start(&self) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut source = self.sender.subscribe();
        let subscribed = Arc::clone(&self.subscribed);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(envelope) => {
                        let wants = subscribed
                            .lock()
                            .map(|set| set.contains(&envelope.conversation_id))
                            .unwrap_or(false);
                        if wants && tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "进程内总线落后，消息被跳过");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("进程内总线转发循环退出");
        });

        rx
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), BusError> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(envelope.clone())
            .map_err(|err| BusError::publish(err.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError> {
        if let Ok(mut set) = self.subscribed.lock() {
            set.insert(conversation_id.clone());
        }
        Ok(())
    }

    async fn unsubscribe(&self, conversation_id: &ConversationId) -> Result<(), BusError> {
        if let Ok(mut set) = self.subscribed.lock() {
            set.remove(conversation_id);
        }
        Ok(())
    }
}
