//! 连接注册表
//!
//! 进程内唯一知道哪些套接字在本地的地方：用户标识到在线连接
//! 写端的映射。按用户哈希分片加锁，不存在全局锁；投递前把写端
//! 拷贝出锁外再执行写入。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use domain::{ConnectionId, Envelope, UserId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 分片数量，按用户哈希取模
const SHARD_COUNT: usize = 16;

/// 连接的出站写端：路由到该连接的信封经此进入连接的写任务
pub type EnvelopeSender = mpsc::UnboundedSender<Envelope>;

/// 注册表错误
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    /// 资源耗尽。报告给调用方，不是进程级致命错误
    #[error("connection registry exhausted: {current}/{max} connections")]
    Exhausted { current: usize, max: usize },

    #[error("registry lock poisoned")]
    Poisoned,
}

/// 进程内连接注册表
pub struct ConnectionRegistry {
    /// user -> connection -> 出站写端
    shards: Vec<RwLock<HashMap<UserId, HashMap<ConnectionId, EnvelopeSender>>>>,
    /// connection -> user 反查，unregister 只拿连接标识
    index_shards: Vec<RwLock<HashMap<ConnectionId, UserId>>>,
    max_connections: usize,
    connection_count: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            index_shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            max_connections,
            connection_count: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, user_id: &UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    fn index_shard_for(&self, connection_id: &ConnectionId) -> usize {
        let mut hasher = DefaultHasher::new();
        connection_id.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    /// 注册一条连接，返回连接标识。
    /// 只在容量耗尽时失败，同一用户可以注册多条连接（多端在线）。
    pub fn register(
        &self,
        user_id: UserId,
        sender: EnvelopeSender,
    ) -> Result<ConnectionId, RegistryError> {
        let current = self.connection_count.fetch_add(1, Ordering::AcqRel);
        if current >= self.max_connections {
            self.connection_count.fetch_sub(1, Ordering::AcqRel);
            return Err(RegistryError::Exhausted {
                current,
                max: self.max_connections,
            });
        }

        let connection_id = ConnectionId::generate();

        {
            let mut shard = self.shards[self.shard_for(&user_id)]
                .write()
                .map_err(|_| RegistryError::Poisoned)?;
            shard
                .entry(user_id.clone())
                .or_default()
                .insert(connection_id, sender);
        }
        {
            let mut index = self.index_shards[self.index_shard_for(&connection_id)]
                .write()
                .map_err(|_| RegistryError::Poisoned)?;
            index.insert(connection_id, user_id.clone());
        }

        debug!(%user_id, %connection_id, "连接已注册");
        Ok(connection_id)
    }

    /// 注销一条连接。幂等：注销不存在的连接是空操作。
    pub fn unregister(&self, connection_id: ConnectionId) {
        let user_id = {
            let Ok(mut index) = self.index_shards[self.index_shard_for(&connection_id)].write()
            else {
                return;
            };
            index.remove(&connection_id)
        };

        let Some(user_id) = user_id else {
            return;
        };

        if let Ok(mut shard) = self.shards[self.shard_for(&user_id)].write() {
            if let Some(connections) = shard.get_mut(&user_id) {
                if connections.remove(&connection_id).is_some() {
                    self.connection_count.fetch_sub(1, Ordering::AcqRel);
                }
                if connections.is_empty() {
                    shard.remove(&user_id);
                }
            }
        }

        debug!(%user_id, %connection_id, "连接已注销");
    }

    /// 用户在本进程的全部连接写端快照。
    /// 用户不在本地时返回空——在集群里这是常态，不是错误。
    pub fn local_senders_for(&self, user_id: &UserId) -> Vec<(ConnectionId, EnvelopeSender)> {
        let Ok(shard) = self.shards[self.shard_for(user_id)].read() else {
            return Vec::new();
        };
        shard
            .get(user_id)
            .map(|connections| {
                connections
                    .iter()
                    .map(|(id, sender)| (*id, sender.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 向用户的每条本地连接投递信封，返回送达条数。
    ///
    /// 单条连接的写端关闭视为断连，把它移除后继续投递其余连接；
    /// 部分送达仍然算成功。
    pub fn deliver(&self, user_id: &UserId, envelope: &Envelope) -> usize {
        // 写端先拷出锁外，通道写入不在持锁状态下进行
        let senders = self.local_senders_for(user_id);
        if senders.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        for (connection_id, sender) in senders {
            match sender.send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(%user_id, %connection_id, "连接写端已关闭，按断连处理");
                    self.unregister(connection_id);
                }
            }
        }
        delivered
    }

    /// 用户当前的本地连接数
    pub fn connection_count_for(&self, user_id: &UserId) -> usize {
        let Ok(shard) = self.shards[self.shard_for(user_id)].read() else {
            return 0;
        };
        shard.get(user_id).map(HashMap::len).unwrap_or(0)
    }

    /// 全进程连接数
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Acquire)
    }

    /// 停机排空：关闭所有出站写端，写任务随之退出并关闭套接字
    pub fn drain(&self) {
        for (shard, index) in self.shards.iter().zip(self.index_shards.iter()) {
            if let Ok(mut shard) = shard.write() {
                shard.clear();
            }
            if let Ok(mut index) = index.write() {
                index.clear();
            }
        }
        self.connection_count.store(0, Ordering::Release);
        debug!("注册表已排空");
    }
}
