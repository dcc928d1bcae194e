//! 领域模型层。
//!
//! 定义路由核心共享的值对象、消息信封实体以及外部存储的抽象接口。
//! 这一层不依赖运行时，也不依赖任何具体的存储实现。

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;

pub use entities::envelope::{Envelope, MessageKind};
pub use entities::profile::{ConversationPreview, UserProfile};
pub use entities::quota::QuotaState;
pub use entities::session::SessionRecord;
pub use errors::{DomainError, DomainResult};
pub use repositories::message_store::MessageStore;
pub use repositories::object_store::{upload_object_key, ObjectStore, PresignOperation, PresignedUrl};
pub use repositories::session_store::SessionStore;
pub use repositories::{StoreError, StoreResult};
pub use value_objects::{ConnectionId, ConversationId, MessageId, NodeId, UserId, UserTier};
