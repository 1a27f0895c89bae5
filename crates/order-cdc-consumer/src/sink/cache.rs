//! Redis 缓存实现：共享库的 `Cache` 直接作为缓存存储使用

use async_trait::async_trait;
use cdc_shared::cache::Cache;
use cdc_shared::error::Result;

use super::CacheStore;

#[async_trait]
impl CacheStore for Cache {
    async fn replace_hash(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        Cache::replace_hash(self, key, fields).await
    }

    async fn push_capped(&self, key: &str, value: &str, capacity: usize) -> Result<()> {
        Cache::push_capped(self, key, value, capacity).await
    }
}
