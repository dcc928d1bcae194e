//! 基础设施层。
//!
//! 应用层抽象接口的具体实现：Redis 扇出总线与会话存储、
//! PostgreSQL 持久化存储、HMAC 上传签名器，以及单节点模式和
//! 测试用的进程内实现。

pub mod db;
pub mod local_bus;
pub mod memory;
pub mod presign;
pub mod redis;

pub use db::{create_pg_pool, PgMessageStore, MIGRATOR};
pub use local_bus::LocalBus;
pub use memory::{MemoryMessageStore, MemorySessionStore};
pub use presign::HmacPresigner;
pub use self::redis::{RedisBus, RedisBusConfig, RedisError, RedisSessionStore};
