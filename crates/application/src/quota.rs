//! 配额门
//!
//! 发送尝试在路由之前先过这道门。免费层在当前窗口内有消息条数
//! 上限，高级层消息不限量但附件大小可以设上限。计数器按用户分片
//! 加锁，同一用户的并发递增串行执行；拒绝的尝试不计数。
//!
//! 真实计数归外部存储所有，这里是接入时读穿、提交后异步回写的
//! 缓存副本。窗口长度与重置节奏由配置给定，不内置策略。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use domain::{MessageKind, QuotaState, UserId, UserTier};
use thiserror::Error;
use time::OffsetDateTime;

const SHARD_COUNT: usize = 16;

/// 配额参数
#[derive(Debug, Clone)]
pub struct QuotaSettings {
    /// 免费层窗口内消息上限
    pub max_free_messages: u32,
    /// 窗口长度
    pub window: Duration,
    /// 免费层附件字节上限
    pub max_free_file_bytes: u64,
    /// 高级层附件字节上限，`None` 表示不限制
    pub max_premium_file_bytes: Option<u64>,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            max_free_messages: 50,
            window: Duration::from_secs(86_400),
            max_free_file_bytes: 2 * 1024 * 1024,
            max_premium_file_bytes: None,
        }
    }
}

/// 配额拒绝原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaDenied {
    #[error("message quota exhausted: {current}/{max} messages in the current window")]
    MessageCeiling { current: u32, max: u32 },

    #[error("file size {size} exceeds the limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
}

/// 通过的发送尝试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// 本次发送是否计入了持久化计数（高级层不计数）
    pub counted: bool,
}

/// 单个用户的配额缓存
#[derive(Debug)]
struct UserQuota {
    message_count: u32,
    tier: UserTier,
    window_start: Instant,
    window_started_at: OffsetDateTime,
}

impl UserQuota {
    fn new(tier: UserTier, message_count: u32) -> Self {
        Self {
            message_count,
            tier,
            window_start: Instant::now(),
            window_started_at: OffsetDateTime::now_utc(),
        }
    }

    fn reset_window(&mut self) {
        self.message_count = 0;
        self.window_start = Instant::now();
        self.window_started_at = OffsetDateTime::now_utc();
    }
}

/// 配额门
pub struct QuotaGate {
    settings: QuotaSettings,
    shards: Vec<Mutex<HashMap<UserId, UserQuota>>>,
}

impl QuotaGate {
    pub fn new(settings: QuotaSettings) -> Self {
        Self {
            settings,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, user_id: &UserId) -> &Mutex<HashMap<UserId, UserQuota>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// 接入时用存储里的档案播种缓存。已有缓存（同用户的其他
    /// 设备已在线）时保留本地更新的副本。
    pub fn seed(&self, user_id: &UserId, tier: UserTier, message_count: u32) {
        if let Ok(mut shard) = self.shard_for(user_id).lock() {
            shard
                .entry(user_id.clone())
                .and_modify(|quota| quota.tier = tier)
                .or_insert_with(|| UserQuota::new(tier, message_count));
        }
    }

    /// 档案读取失败时的播种：免费层按已到上限处理，拒绝服务
    /// 优于放行未知用户。
    pub fn seed_deny_safe(&self, user_id: &UserId) {
        self.seed(user_id, UserTier::Free, self.settings.max_free_messages);
    }

    /// 判定并登记一次发送尝试。
    ///
    /// 检查和递增在同一把用户级锁里完成：N 次通过的并发发送
    /// 恰好让计数器加 N，被拒绝的尝试不计数。
    pub fn admit(&self, user_id: &UserId, _kind: MessageKind) -> Result<Admission, QuotaDenied> {
        let Ok(mut shard) = self.shard_for(user_id).lock() else {
            // 锁中毒按拒绝处理，宁可少发不可超发
            return Err(QuotaDenied::MessageCeiling {
                current: self.settings.max_free_messages,
                max: self.settings.max_free_messages,
            });
        };

        let quota = shard
            .entry(user_id.clone())
            .or_insert_with(|| UserQuota::new(UserTier::Free, 0));

        if quota.window_start.elapsed() >= self.settings.window {
            quota.reset_window();
        }

        if quota.tier.is_premium() {
            return Ok(Admission { counted: false });
        }

        if quota.message_count >= self.settings.max_free_messages {
            return Err(QuotaDenied::MessageCeiling {
                current: quota.message_count,
                max: self.settings.max_free_messages,
            });
        }

        quota.message_count += 1;
        Ok(Admission { counted: true })
    }

    /// 附件大小检查，在签发上传 URL 之前调用
    pub fn check_file_size(&self, user_id: &UserId, size: u64) -> Result<(), QuotaDenied> {
        let tier = self
            .shard_for(user_id)
            .lock()
            .ok()
            .and_then(|shard| shard.get(user_id).map(|q| q.tier))
            .unwrap_or(UserTier::Free);

        let ceiling = match tier {
            UserTier::Free => Some(self.settings.max_free_file_bytes),
            UserTier::Premium => self.settings.max_premium_file_bytes,
        };

        match ceiling {
            Some(max) if size > max => Err(QuotaDenied::FileTooLarge { size, max }),
            _ => Ok(()),
        }
    }

    /// 当前缓存视图，测试与诊断用
    pub fn snapshot(&self, user_id: &UserId) -> Option<QuotaState> {
        let shard = self.shard_for(user_id).lock().ok()?;
        shard.get(user_id).map(|quota| QuotaState {
            user_id: user_id.clone(),
            message_count: quota.message_count,
            tier: quota.tier,
            window_start: quota.window_started_at,
        })
    }

    /// 清理窗口早已过期的缓存条目
    pub fn cleanup_expired(&self) {
        for shard in &self.shards {
            if let Ok(mut shard) = shard.lock() {
                shard.retain(|_, quota| quota.window_start.elapsed() < self.settings.window * 2);
            }
        }
    }
}
