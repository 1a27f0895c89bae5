//! 双写器
//!
//! 写入顺序：
//! 1. 关系库 upsert（冲突裁决以关系库为准）
//! 2. 整体覆盖缓存订单哈希 `order:{order_id}`
//! 3. 头插最近订单列表并截断
//!
//! 第一步失败时直接返回，不触碰缓存；第二、三步失败时关系库已写入，
//! 两个存储暂时不一致。无论哪一步失败都返回错误，由调用方不提交 offset，
//! 重新投递时第一步是幂等的 upsert，重复执行不会破坏关系库。

use std::sync::Arc;

use cdc_shared::cache::CacheKey;
use tracing::{debug, instrument, warn};

use crate::error::WriteError;
use crate::models::ResultRecord;
use crate::sink::{CacheStore, RelationalStore};

/// 最近订单列表默认容量
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// 无状态双写器，可在多个 worker 间共享
#[derive(Clone)]
pub struct DualSinkWriter {
    relational: Arc<dyn RelationalStore>,
    cache: Arc<dyn CacheStore>,
    recent_capacity: usize,
}

impl DualSinkWriter {
    pub fn new(relational: Arc<dyn RelationalStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            relational,
            cache,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }

    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }

    pub fn recent_capacity(&self) -> usize {
        self.recent_capacity
    }

    /// 将结果写入两个存储
    #[instrument(skip(self, record), fields(order_id = %record.order_id))]
    pub async fn persist(&self, record: &ResultRecord) -> Result<(), WriteError> {
        // 先序列化，保证序列化失败时任何存储都未被修改
        let serialized = record
            .to_json()
            .map_err(|e| WriteError::Serialization(e.to_string()))?;
        let fields = record.to_hash_fields();

        self.relational
            .upsert(record)
            .await
            .map_err(WriteError::Relational)?;

        let key = CacheKey::order(&record.order_id);
        if let Err(e) = self.cache.replace_hash(&key, &fields).await {
            warn!(key = %key, error = %e, "关系库已写入但订单哈希写入失败，两个存储暂时不一致");
            return Err(WriteError::CachePoint(e));
        }

        if let Err(e) = self
            .cache
            .push_capped(CacheKey::RECENT_ORDERS, &serialized, self.recent_capacity)
            .await
        {
            warn!(error = %e, "最近订单列表写入失败，两个存储暂时不一致");
            return Err(WriteError::CacheRecent(e));
        }

        debug!(status = %record.status, total = %record.total, "双写完成");
        Ok(())
    }
}
