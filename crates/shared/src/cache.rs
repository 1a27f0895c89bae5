//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和管道写入所需的哈希/列表操作封装。

use crate::config::RedisConfig;
use crate::error::{CdcError, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{info, instrument};

/// Redis 缓存客户端
///
/// `Client` 本身不持有连接，每次操作获取一条多路复用连接，
/// 多个 worker 共享同一个 `Cache` 不需要额外加锁。
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self> {
        Self::from_url(&config.url())
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        info!("Redis client created");
        Ok(Self { client })
    }

    /// 获取连接
    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(CdcError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(CdcError::from)
    }

    /// 整体替换哈希
    ///
    /// DEL + HSET 在同一个 MULTI 事务中执行，旧版本中多出的字段不会残留，
    /// 读者也不会看到删除后、写入前的空窗口。
    #[instrument(skip(self, fields))]
    pub async fn replace_hash(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .hset_multiple(key, fields)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// 头部插入并截断到 capacity 条（LPUSH + LTRIM，原子执行）
    #[instrument(skip(self, value))]
    pub async fn push_capped(&self, key: &str, value: &str, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(CdcError::Internal("列表容量必须大于 0".to_string()));
        }

        let mut conn = self.get_conn().await?;
        redis::pipe()
            .atomic()
            .lpush(key, value)
            .ignore()
            .ltrim(key, 0, capacity as isize - 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// 读取整个哈希
    pub async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.get_conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    /// 读取列表区间（闭区间，支持负数下标）
    pub async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.get_conn().await?;
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    /// 删除值
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 最近处理订单列表
    pub const RECENT_ORDERS: &'static str = "recent_orders";

    pub fn order(order_id: &str) -> String {
        format!("order:{}", order_id)
    }
}
