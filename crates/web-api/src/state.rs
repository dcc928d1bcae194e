use std::sync::Arc;

use application::{MessageRouter, QuotaGate, SessionValidator};
use domain::{MessageStore, ObjectStore};

/// 共享应用状态
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<SessionValidator>,
    pub router: Arc<MessageRouter>,
    pub quota: Arc<QuotaGate>,
    pub message_store: Arc<dyn MessageStore>,
    pub object_store: Arc<dyn ObjectStore>,
    /// 上传 URL 的有效期
    pub presign_ttl_secs: u64,
}

impl AppState {
    pub fn new(
        validator: Arc<SessionValidator>,
        router: Arc<MessageRouter>,
        quota: Arc<QuotaGate>,
        message_store: Arc<dyn MessageStore>,
        object_store: Arc<dyn ObjectStore>,
        presign_ttl_secs: u64,
    ) -> Self {
        Self {
            validator,
            router,
            quota,
            message_store,
            object_store,
            presign_ttl_secs,
        }
    }
}
