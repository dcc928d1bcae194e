//! PostgreSQL 持久化

mod message_store;

pub use message_store::PgMessageStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// 数据库连接池类型
pub type DbPool = PgPool;

/// 数据库迁移器
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// 创建 PostgreSQL 连接池
pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
