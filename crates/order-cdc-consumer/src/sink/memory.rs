//! 内存存储实现
//!
//! 语义与 PostgreSQL / Redis 实现一致（合并策略、整体替换、头插截断），
//! 并支持模拟存储不可用，用于管道级测试。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use cdc_shared::error::{CdcError, Result};
use parking_lot::Mutex;

use super::{CacheStore, RelationalStore};
use crate::models::ResultRecord;
use crate::upsert::UpsertPolicy;

fn connection_refused(store: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        format!("{store} unavailable"),
    )
}

// ---------------------------------------------------------------------------
// InMemoryRelationalStore
// ---------------------------------------------------------------------------

/// 内存结果表
pub struct InMemoryRelationalStore {
    policy: UpsertPolicy,
    rows: Mutex<HashMap<String, ResultRecord>>,
    unavailable: AtomicBool,
    upsert_calls: AtomicUsize,
}

impl InMemoryRelationalStore {
    pub fn new(policy: UpsertPolicy) -> Self {
        Self {
            policy,
            rows: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    /// 模拟数据库不可达
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, order_id: &str) -> Option<ResultRecord> {
        self.rows.lock().get(order_id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// 包括失败在内的调用次数
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryRelationalStore {
    fn default() -> Self {
        Self::new(UpsertPolicy::first_write_wins())
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn upsert(&self, record: &ResultRecord) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CdcError::Database(sqlx::Error::Io(connection_refused(
                "postgres",
            ))));
        }

        let mut rows = self.rows.lock();
        let merged = self.policy.merge(rows.get(&record.order_id), record);
        rows.insert(record.order_id.clone(), merged);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InMemoryCacheStore
// ---------------------------------------------------------------------------

/// 内存缓存
#[derive(Default)]
pub struct InMemoryCacheStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    hash_unavailable: AtomicBool,
    list_unavailable: AtomicBool,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟整个缓存不可达
    pub fn set_unavailable(&self, unavailable: bool) {
        self.hash_unavailable.store(unavailable, Ordering::SeqCst);
        self.list_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 只让列表操作失败，用于模拟第三步单独失败
    pub fn set_list_unavailable(&self, unavailable: bool) {
        self.list_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn hash(&self, key: &str) -> Option<HashMap<String, String>> {
        self.hashes.lock().get(key).cloned()
    }

    /// 列表内容，头部在前
    pub fn list(&self, key: &str) -> Vec<String> {
        self.lists
            .lock()
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn hash_count(&self) -> usize {
        self.hashes.lock().len()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn replace_hash(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if self.hash_unavailable.load(Ordering::SeqCst) {
            return Err(CdcError::Redis(connection_refused("redis").into()));
        }

        let replacement: HashMap<String, String> = fields.iter().cloned().collect();
        self.hashes.lock().insert(key.to_string(), replacement);
        Ok(())
    }

    async fn push_capped(&self, key: &str, value: &str, capacity: usize) -> Result<()> {
        if self.list_unavailable.load(Ordering::SeqCst) {
            return Err(CdcError::Redis(connection_refused("redis").into()));
        }

        let mut lists = self.lists.lock();
        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        list.truncate(capacity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn record(status: &str, quantity: i32) -> ResultRecord {
        ResultRecord {
            order_id: "O1".to_string(),
            customer_id: None,
            product_id: None,
            quantity,
            price: Decimal::ONE,
            total: Decimal::from(quantity),
            status: status.to_string(),
            processed_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_relational_store_applies_policy() {
        let store = InMemoryRelationalStore::default();
        store.upsert(&record("PENDING", 3)).await.unwrap();
        store.upsert(&record("SHIPPED", 9)).await.unwrap();

        let row = store.get("O1").unwrap();
        assert_eq!(row.status, "SHIPPED");
        assert_eq!(row.quantity, 3);
        assert_eq!(store.row_count(), 1);
        assert_eq!(store.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn test_relational_store_unavailable_is_retryable() {
        let store = InMemoryRelationalStore::default();
        store.set_unavailable(true);

        let err = store.upsert(&record("PENDING", 1)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_store_replaces_hash_and_caps_list() {
        let cache = InMemoryCacheStore::new();
        cache
            .replace_hash("order:O1", &[("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())])
            .await
            .unwrap();
        cache
            .replace_hash("order:O1", &[("a".to_string(), "3".to_string())])
            .await
            .unwrap();

        let hash = cache.hash("order:O1").unwrap();
        assert_eq!(hash.len(), 1);
        assert_eq!(hash["a"], "3");

        for i in 0..5 {
            cache.push_capped("recent", &i.to_string(), 3).await.unwrap();
        }
        assert_eq!(cache.list("recent"), vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn test_cache_store_unavailable() {
        let cache = InMemoryCacheStore::new();
        cache.set_unavailable(true);

        let err = cache.push_capped("recent", "x", 10).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(cache.list("recent").is_empty());
    }
}
