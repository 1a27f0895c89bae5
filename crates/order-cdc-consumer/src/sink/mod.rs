//! 下游存储接口
//!
//! 写入器只依赖这两个 trait，生产环境使用 PostgreSQL / Redis 实现，
//! 测试使用 `memory` 模块中的内存实现或 mockall 生成的 mock。

pub mod cache;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use cdc_shared::error::Result;

use crate::models::ResultRecord;

pub use memory::{InMemoryCacheStore, InMemoryRelationalStore};
pub use postgres::PgResultStore;

/// 关系库（系统记录）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// 按 order_id 幂等写入，冲突时按合并策略更新
    async fn upsert(&self, record: &ResultRecord) -> Result<()>;
}

/// 缓存
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 用给定字段整体替换哈希
    async fn replace_hash(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// 插入列表头部并截断到 capacity 条
    async fn push_capped(&self, key: &str, value: &str, capacity: usize) -> Result<()>;
}
